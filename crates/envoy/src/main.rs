mod config;
mod logging;
mod ui;

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand, ValueEnum};

use config::Config;
use parlance_engine::shared::{ConversationPatch, Credentials, NewConversation};
use parlance_engine::{
    ApiClient, AuthContext, ChatSession, ConversationService, HttpTransport, NavigationIntent,
    Notifier,
};

#[derive(Parser)]
#[command(name = "envoy")]
#[command(about = "Envoy - terminal client for Parlance chat", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in to the server
    Login {
        email: String,
        /// Read from stdin when omitted
        #[arg(long)]
        password: Option<String>,
    },
    /// Create an account and sign in
    Register {
        email: String,
        #[arg(long)]
        password: Option<String>,
    },
    /// Sign out and forget the saved session
    Logout,
    /// List conversations, newest first
    List,
    /// Start a conversation; with a first message, wait for the reply
    New {
        message: Option<String>,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        system_prompt: Option<String>,
    },
    /// Chat in a conversation (the most recent one when no id is given)
    Chat { id: Option<String> },
    /// Delete a conversation
    Delete { id: String },
    /// Rename a conversation
    Rename { id: String, title: String },
    /// Set a conversation's instructions (system prompt)
    Prompt { id: String, text: String },
    /// Show or change the configuration
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Change a setting
    Set { key: ConfigKey, value: String },
}

#[derive(Clone, Copy, ValueEnum)]
enum ConfigKey {
    Server,
}

/// Everything a command needs, wired from the saved config.
struct App {
    config: Config,
    auth: AuthContext,
    client: Arc<ApiClient>,
    service: ConversationService<ApiClient>,
}

impl App {
    fn new(config: Config) -> Result<Self> {
        let auth = config.auth_context();
        let client = Arc::new(ApiClient::new(config.api_config()?, auth.clone())?);
        let service = ConversationService::new(Arc::clone(&client), Notifier::new());
        Ok(Self {
            config,
            auth,
            client,
            service,
        })
    }

    fn session(&self) -> Result<ChatSession<HttpTransport, ApiClient>> {
        let transport = HttpTransport::new(self.config.api_config()?, self.auth.clone())?;
        Ok(ChatSession::new(Arc::new(transport), self.service.clone()))
    }

    fn require_login(&self) -> Result<()> {
        if !self.auth.is_authenticated() {
            bail!("Not signed in. Run: envoy login <email>");
        }
        Ok(())
    }

    /// Persist whatever the auth context holds now (a 401 may have cleared it).
    fn save_session(&mut self) -> Result<()> {
        let before = self.config.clone();
        match (self.auth.token(), self.auth.user()) {
            (Some(token), Some(user)) => self.config.sign_in(token, user),
            _ => self.config.sign_out(),
        }
        if self.config != before {
            self.config.save()?;
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();

    let cli = Cli::parse();
    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {}", e);
            return Err(e);
        }
    };

    let mut app = App::new(config)?;
    let printer = ui::spawn_notice_printer(app.service.notifier());
    let result = run(&mut app, cli.command.unwrap_or(Commands::Chat { id: None })).await;
    app.save_session()?;

    // Let queued notices reach the terminal before exiting.
    tokio::task::yield_now().await;
    printer.abort();
    result
}

async fn run(app: &mut App, command: Commands) -> Result<()> {
    match command {
        Commands::Login { email, password } => {
            let credentials = Credentials {
                email,
                password: password_or_prompt(password)?,
            };
            let user = app.client.login(&credentials).await?;
            println!("Welcome back, {}!", user.email);
        }
        Commands::Register { email, password } => {
            let credentials = Credentials {
                email,
                password: password_or_prompt(password)?,
            };
            let user = app.client.register(&credentials).await?;
            println!("Account created for {}.", user.email);
        }
        Commands::Logout => {
            if let Err(e) = app.client.logout().await {
                tracing::warn!(error = %e, "server logout failed");
            }
            println!("Logged out.");
        }
        Commands::List => {
            app.require_login()?;
            let conversations = app.service.refresh().await?;
            ui::print_conversations(&conversations);
        }
        Commands::New {
            message,
            title,
            system_prompt,
        } => {
            app.require_login()?;
            let (conversation, intent) = match message {
                Some(message) => {
                    let params = NewConversation {
                        title,
                        first_message: message,
                        system_prompt,
                    };
                    let conversation = app.service.create_with_message(&params).await?;
                    (conversation, NavigationIntent::auto_trigger())
                }
                None => {
                    let conversation = app.service.create(title.as_deref()).await?;
                    if let Some(prompt) = system_prompt {
                        app.service
                            .update_system_prompt(&conversation.id, &prompt)
                            .await?;
                    }
                    (conversation, NavigationIntent::default())
                }
            };
            println!("Started conversation {}\n", conversation.id);
            ui::interactive_chat(app.session()?, conversation.id, intent).await?;
        }
        Commands::Chat { id } => {
            app.require_login()?;
            let id = match id {
                Some(id) => id,
                None => match app.service.refresh().await?.into_iter().next() {
                    Some(latest) => latest.id,
                    None => {
                        ui::print_conversations(&[]);
                        return Ok(());
                    }
                },
            };
            ui::interactive_chat(app.session()?, id, NavigationIntent::default()).await?;
        }
        Commands::Delete { id } => {
            app.require_login()?;
            app.service.refresh().await?;
            app.service.delete(&id).await?;
        }
        Commands::Rename { id, title } => {
            app.require_login()?;
            app.service.refresh().await?;
            let conversation = app.service.update(&id, &ConversationPatch::title(title)).await?;
            println!("Renamed to: {}", conversation.title);
        }
        Commands::Prompt { id, text } => {
            app.require_login()?;
            app.service.refresh().await?;
            app.service.update_system_prompt(&id, &text).await?;
        }
        Commands::Config { action } => match action {
            None => {
                println!("Current config:");
                println!("  Server URL: {}", app.config.server_url);
                match &app.config.user {
                    Some(user) => println!("  Signed in as: {}", user.email),
                    None => println!("  Signed in as: (nobody)"),
                }
            }
            Some(ConfigAction::Set {
                key: ConfigKey::Server,
                value,
            }) => {
                app.config.server_url = value;
                app.config.save()?;
                println!("Server URL updated to: {}", app.config.server_url);
            }
        },
    }

    Ok(())
}

fn password_or_prompt(password: Option<String>) -> Result<String> {
    if let Some(password) = password {
        return Ok(password);
    }

    print!("Password: ");
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim_end_matches(['\r', '\n']).to_string())
}
