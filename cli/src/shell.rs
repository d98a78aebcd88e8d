//! Line-oriented chat shell: one line in, one rendered answer out.

use anyhow::Result;
use console::style;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use termimad::MadSkin;
use tinker_core::agent::AgentLoop;
use tinker_core::config;

const EXIT_COMMANDS: [&str; 3] = ["exit", "quit", "q"];

fn is_exit_command(line: &str) -> bool {
    EXIT_COMMANDS
        .iter()
        .any(|cmd| line.trim().eq_ignore_ascii_case(cmd))
}

pub async fn run(agent: &mut AgentLoop) -> Result<()> {
    let mut rl = DefaultEditor::new()?;
    let history_path = config::get_tinker_dir().join("history");
    let _ = rl.load_history(&history_path);
    let skin = MadSkin::default();

    println!("{}\n", style("Type a message, or `exit` to leave.").dim());

    loop {
        let line = match rl.readline(&format!("{} ", style("you>").cyan())) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("{} {}", style("Error:").red(), e);
                break;
            }
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let _ = rl.add_history_entry(line);
        if is_exit_command(line) {
            break;
        }

        tokio::select! {
            answer = agent.process(line) => {
                println!();
                skin.print_text(&answer);
                println!();
            }
            _ = tokio::signal::ctrl_c() => {
                println!("{}", style("^C").dim());
                break;
            }
        }
    }

    if std::fs::create_dir_all(config::get_tinker_dir()).is_ok() {
        let _ = rl.save_history(&history_path);
    }
    println!("{}", style("Bye!").dim());

    Ok(())
}
