// Terminal chat over the same conversation core the web UI uses.

use anyhow::Result;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::info;

use crate::constants;
use crate::conversation::{ConversationState, Role, SubmitError};
use crate::router::{self, Services};

/// Runs the chat loop until `/quit` or end of input.
pub async fn run_chat<R, W>(services: Option<Services>, input: R, mut output: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    info!("Starting terminal chat session...");
    let Some(services) = services else {
        output
            .write_all(b"Chat is unavailable: set GROQ_API_KEY and TAVILY_API_KEY (or add them to the secrets file).\n")
            .await?;
        output.flush().await?;
        return Ok(());
    };

    let mut state = ConversationState::new();
    print_turn(&mut output, &state).await?;

    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        match line {
            "/quit" => break,
            "/reset" => {
                state.reset();
                print_turn(&mut output, &state).await?;
            }
            "/topics" => {
                for topic in constants::TOPICS {
                    output.write_all(format!("  {}\n", topic).as_bytes()).await?;
                }
            }
            _ => match state.begin_turn(line) {
                Ok(_) => {
                    router::handle_turn(&mut state, &services).await;
                    print_turn(&mut output, &state).await?;
                }
                // Each turn is answered before the next line is read, so only blanks land here
                Err(SubmitError::Empty | SubmitError::Busy) => continue,
            },
        }
        output.flush().await?;
    }

    info!("Chat session finished.");
    Ok(())
}

async fn print_turn<W: AsyncWrite + Unpin>(output: &mut W, state: &ConversationState) -> Result<()> {
    if let Some(turn) = state.turns.last() {
        let who = match turn.role {
            Role::User => "You",
            Role::Assistant => "Bot",
        };
        output
            .write_all(format!("[{}] {}: {}\n", turn.timestamp, who, turn.content).as_bytes())
            .await?;
    }
    Ok(())
}
