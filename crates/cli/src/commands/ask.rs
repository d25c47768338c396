//! `toolchat ask`: Single-query or interactive mode.

use std::path::Path;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use toolchat_agent::ConversationLoop;

pub async fn run(config_path: Option<&Path>, message: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(config_path)?;
    let agent = super::build_agent(&config)?;

    if let Some(query) = message {
        let response = agent.ask(query).await?;
        println!("{response}");
        return Ok(());
    }

    println!();
    println!("  toolchat: interactive mode");
    println!("  Provider:  {}", config.provider);
    println!("  Model:     {}", config.model);
    println!("  Tools:     {}", agent.tools().names().join(", "));
    println!();
    println!("  Type your query and press Enter. Type 'quit' or 'exit' to leave.");
    println!();

    let stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();
    chat_session(&agent, stdin, &mut stdout).await?;

    println!();
    println!("  Goodbye!");
    Ok(())
}

/// Read queries line by line until EOF, `quit` or `exit`.
///
/// Every query is answered in a fresh conversation. A failed query prints
/// an error line and the session continues.
pub async fn chat_session<R, W>(agent: &ConversationLoop, input: R, output: &mut W) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    loop {
        output.write_all(b"\nQuery: ").await?;
        output.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let query = line.trim();
        if query.is_empty() {
            continue;
        }
        if query.eq_ignore_ascii_case("quit") || query.eq_ignore_ascii_case("exit") {
            break;
        }

        match agent.ask(query).await {
            Ok(response) => output.write_all(format!("\n{response}\n").as_bytes()).await?,
            Err(e) => output.write_all(format!("\nError: {e}\n").as_bytes()).await?,
        }
    }
    output.flush().await
}
