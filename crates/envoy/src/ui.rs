use std::future::Future;
use std::io::{self, Write};

use anyhow::Result;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use parlance_engine::shared::{Conversation, Message, Role};
use parlance_engine::{
    ChatSession, ConversationBackend, NavigationIntent, NoticeLevel, Notifier, SendOutcome,
    SessionSnapshot, Transport,
};

/// Print notices to stderr as they arrive, until the notifier is dropped.
pub fn spawn_notice_printer(notifier: &Notifier) -> JoinHandle<()> {
    let mut notices = notifier.subscribe();
    tokio::spawn(async move {
        loop {
            let notice = match notices.recv().await {
                Ok(notice) => notice,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "notice printer fell behind");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            let marker = match notice.level {
                NoticeLevel::Success => "✓",
                NoticeLevel::Info => "ℹ",
                NoticeLevel::Error => "✗",
            };
            eprintln!("{marker} {}", notice.message);
        }
    })
}

pub fn print_conversations(conversations: &[Conversation]) {
    if conversations.is_empty() {
        println!("No conversations yet. Start one with: envoy new \"your message\"");
        return;
    }

    for conversation in conversations {
        println!(
            "{}  {}  {}",
            conversation.id,
            conversation.updated_at.format("%Y-%m-%d %H:%M"),
            conversation.title
        );
    }
}

pub async fn interactive_chat<T, B>(
    session: ChatSession<T, B>,
    conversation_id: String,
    intent: NavigationIntent,
) -> Result<()>
where
    T: Transport + 'static,
    B: ConversationBackend + 'static,
{
    let mut printer = StreamPrinter::default();
    let outcome = render_while(
        &session,
        &mut printer,
        session.select(Some(conversation_id), intent),
    )
    .await;

    match outcome {
        Some(outcome) => report(&session, outcome),
        None => print_transcript(&session.snapshot().messages),
    }

    println!("Type 'quit' to exit, '/reload' to refresh from the server.\n");
    loop {
        print!("You: ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            break;
        }
        let input = input.trim();

        if input.eq_ignore_ascii_case("quit") || input.eq_ignore_ascii_case("exit") {
            println!("Goodbye!");
            break;
        }
        if input == "/reload" {
            match session.reconcile().await {
                Ok(_) => print_transcript(&session.snapshot().messages),
                Err(e) => eprintln!("Error: {}", e.user_message()),
            }
            continue;
        }
        if input.is_empty() {
            continue;
        }

        println!(); // Blank line before response
        let outcome = render_while(&session, &mut printer, session.send(input)).await;
        report(&session, outcome);
    }

    Ok(())
}

/// Drive `work` while echoing the reply as it streams in.
async fn render_while<T, B, F>(
    session: &ChatSession<T, B>,
    printer: &mut StreamPrinter,
    work: F,
) -> F::Output
where
    T: Transport + 'static,
    B: ConversationBackend + 'static,
    F: Future,
{
    let mut updates = session.subscribe();
    let mut stdout = io::stdout();
    tokio::pin!(work);

    let output = loop {
        tokio::select! {
            output = &mut work => break output,
            changed = updates.changed() => {
                if changed.is_err() {
                    break work.await;
                }
                let snapshot = updates.borrow_and_update().clone();
                printer.render(&snapshot, &mut stdout).ok();
            }
        }
    };

    printer.finish(&session.snapshot(), &mut stdout).ok();
    output
}

fn report<T, B>(session: &ChatSession<T, B>, outcome: SendOutcome)
where
    T: Transport + 'static,
    B: ConversationBackend + 'static,
{
    match outcome {
        SendOutcome::Completed { .. } | SendOutcome::Superseded => println!(),
        SendOutcome::Failed(message) => {
            eprintln!("\n❌ Error: {message}\n");
            session.clear_error();
        }
        SendOutcome::Rejected(reason) => eprintln!("Not sent: {reason}"),
    }
}

fn print_transcript(messages: &[Message]) {
    for message in messages {
        let speaker = match message.role {
            Role::User => "You",
            Role::Assistant => "Assistant",
            Role::System => "System",
        };
        println!("{speaker}: {}\n", message.text());
    }
}

/// Writes only the part of the in-flight reply not yet on screen.
#[derive(Debug, Default)]
pub struct StreamPrinter {
    printed: usize,
    replying: bool,
}

impl StreamPrinter {
    pub fn render(&mut self, snapshot: &SessionSnapshot, out: &mut impl Write) -> io::Result<()> {
        if snapshot.status.is_busy() {
            self.replying = true;
        }
        let text = snapshot.in_flight_text.as_str();
        if text.len() < self.printed {
            // Folded into the list (or a new reply started); nothing new to echo.
            return Ok(());
        }
        if self.printed == 0 && !text.is_empty() {
            write!(out, "Assistant: ")?;
        }
        if let Some(fresh) = text.get(self.printed..) {
            write!(out, "{fresh}")?;
            self.printed = text.len();
        }
        out.flush()
    }

    /// Close the reply. A reply that arrived whole (no deltas) is printed here.
    pub fn finish(&mut self, snapshot: &SessionSnapshot, out: &mut impl Write) -> io::Result<()> {
        if !std::mem::take(&mut self.replying) {
            return Ok(());
        }
        if self.printed == 0 {
            if let Some(last) = snapshot.messages.last().filter(|m| m.role == Role::Assistant) {
                write!(out, "Assistant: {}", last.text())?;
            }
        }
        self.printed = 0;
        writeln!(out)?;
        out.flush()
    }
}
