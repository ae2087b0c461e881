use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use deskchat_render::RenderPipeline;
use deskchat_transport::{TransportError, create_embedding_trigger, create_transport};
use snafu::{ResultExt, Snafu};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

use crate::chat::{ChatController, ChatSurface, Message, Role};
use crate::settings::{ChatSettings, SettingsError, SettingsStore};

pub const EMBEDDINGS_CONFIRMATION: &str = "Are you sure you want to generate embeddings for all enabled DocTypes? This might take a while.";

#[derive(Debug, Parser)]
#[command(name = "deskchat")]
#[command(version, about = "Chat with the knowledge base of a Frappe/ERPNext site")]
pub struct Cli {
    /// Settings file to use instead of the per-user default.
    #[arg(long, global = true, env = "DESKCHAT_SETTINGS_PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Interactive chat over stdin. `/new` starts over, `/quit` exits.
    Chat,
    /// Ask the backend to rebuild embeddings for every enabled DocType.
    GenerateEmbeddings {
        /// Skip the confirmation prompt.
        #[arg(long, short)]
        yes: bool,
    },
    /// Write the settings file, starting from the current settings.
    InitConfig {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
        /// Frappe site to talk to, e.g. `https://erp.example.com`.
        #[arg(long)]
        endpoint: Option<String>,
        #[arg(long)]
        api_key: Option<String>,
        #[arg(long)]
        api_secret: Option<String>,
    },
}

impl Command {
    /// Settings `init-config` should write: `current` with any flags applied.
    fn first_run_settings(&self, current: &ChatSettings) -> ChatSettings {
        let mut settings = current.clone();
        if let Self::InitConfig {
            endpoint,
            api_key,
            api_secret,
            ..
        } = self
        {
            if let Some(endpoint) = endpoint {
                settings.endpoint = endpoint.clone();
            }
            if let Some(api_key) = api_key {
                settings.api_key = api_key.clone();
            }
            if let Some(api_secret) = api_secret {
                settings.api_secret = api_secret.clone();
            }
        }
        settings
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CliError {
    #[snafu(display("transport failed on `{stage}`: {source}"))]
    Transport {
        stage: &'static str,
        source: TransportError,
    },
    #[snafu(display("settings failed on `{stage}`: {source}"))]
    Settings {
        stage: &'static str,
        source: SettingsError,
    },
    #[snafu(display("terminal io failed on `{stage}`: {source}"))]
    Terminal {
        stage: &'static str,
        source: std::io::Error,
    },
}

pub type CliResult<T> = Result<T, CliError>;

pub async fn run(cli: Cli) -> CliResult<()> {
    let store = match cli.config {
        Some(path) => SettingsStore::new(path),
        None => SettingsStore::load(),
    };
    let settings = store.settings();

    let command = cli.command.unwrap_or(Command::Chat);
    match command {
        Command::Chat => run_chat(&settings).await,
        Command::GenerateEmbeddings { yes } => run_generate_embeddings(&settings, yes).await,
        Command::InitConfig { force, .. } => {
            run_init_config(&store, command.first_run_settings(&settings), force)
        }
    }
}

async fn run_chat(settings: &ChatSettings) -> CliResult<()> {
    if !settings.has_credentials() {
        tracing::warn!(
            endpoint = %settings.endpoint,
            "no api credentials configured, the backend may reject requests"
        );
    }

    let transport = create_transport(settings.to_transport_config()).context(TransportSnafu {
        stage: "create-chat-transport",
    })?;
    let pipeline = Arc::new(RenderPipeline::from_settings(&settings.render));
    let mut controller = ChatController::new(
        transport,
        pipeline,
        &settings.greeting,
        TerminalSurface::new(std::io::stdout()),
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context(TerminalSnafu {
        stage: "read-chat-input",
    })? {
        match line.trim() {
            "/quit" | "/exit" => break,
            "/new" => {
                controller.new_chat();
                continue;
            }
            _ => {}
        }

        controller.set_draft(line);
        let Some(pending) = controller.submit_draft() else {
            continue;
        };
        let (turn, result) = pending.wait().await;
        if let Err(rejection) = controller.complete(turn, result) {
            tracing::warn!(turn = ?turn, rejection = ?rejection, "turn result was not applied");
        }
    }

    Ok(())
}

async fn run_generate_embeddings(settings: &ChatSettings, yes: bool) -> CliResult<()> {
    if !yes {
        let mut stdin = BufReader::new(tokio::io::stdin());
        let confirmed = confirm(&mut stdin, &mut std::io::stdout(), EMBEDDINGS_CONFIRMATION)
            .await
            .context(TerminalSnafu {
                stage: "confirm-embedding-generation",
            })?;
        if !confirmed {
            println!("Cancelled.");
            return Ok(());
        }
    }

    let trigger =
        create_embedding_trigger(settings.to_transport_config()).context(TransportSnafu {
            stage: "create-embedding-trigger",
        })?;

    eprintln!("Generating Embeddings...");
    trigger
        .generate_embeddings()
        .await
        .context(TransportSnafu {
            stage: "generate-embeddings",
        })?;
    println!("Embedding generation task started/completed.");
    Ok(())
}

fn run_init_config(store: &SettingsStore, settings: ChatSettings, force: bool) -> CliResult<()> {
    let written = store.init_file(settings, force).context(SettingsSnafu {
        stage: "init-config",
    })?;
    if written {
        let saved = store.settings();
        println!(
            "Wrote settings for {} to {}",
            saved.endpoint,
            store.config_path().display()
        );
        if !saved.has_credentials() {
            println!("No API credentials set; pass --api-key and --api-secret or edit the file.");
        }
    } else {
        println!(
            "Settings already exist at {} (use --force to overwrite)",
            store.config_path().display()
        );
    }
    Ok(())
}

/// Prints `prompt` and reads a yes/no answer. Anything but `y`/`yes` declines.
pub async fn confirm<R, W>(input: &mut R, output: &mut W, prompt: &str) -> std::io::Result<bool>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    write!(output, "{prompt} [y/N] ")?;
    output.flush()?;

    let mut answer = String::new();
    input.read_line(&mut answer).await?;
    let answer = answer.trim();
    Ok(answer.eq_ignore_ascii_case("y") || answer.eq_ignore_ascii_case("yes"))
}

/// Line-oriented chat surface for a terminal.
///
/// Prints assistant messages as they are appended. The user's own input is
/// already on screen, so user messages are not echoed.
pub struct TerminalSurface<W: Write> {
    out: W,
    printed: usize,
}

impl<W: Write> TerminalSurface<W> {
    pub fn new(out: W) -> Self {
        Self { out, printed: 0 }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_message(&mut self, message: &Message) -> std::io::Result<()> {
        match message.role {
            Role::Assistant => writeln!(self.out, "assistant> {}", message.display_html().trim_end()),
            Role::User => Ok(()),
        }
    }
}

impl<W: Write> ChatSurface for TerminalSurface<W> {
    fn set_messages(&mut self, messages: &[Message]) {
        if messages.len() < self.printed {
            // A new chat replaced the history.
            self.printed = 0;
            if let Err(error) = writeln!(self.out, "--- new chat ---") {
                tracing::warn!(error = %error, "failed to write to terminal");
            }
        }

        for message in &messages[self.printed..] {
            if let Err(error) = self.write_message(message) {
                tracing::warn!(error = %error, "failed to write to terminal");
            }
        }
        self.printed = messages.len();
    }

    fn set_awaiting_reply(&mut self, awaiting: bool) {
        if awaiting && let Err(error) = writeln!(self.out, "...") {
            tracing::warn!(error = %error, "failed to write to terminal");
        }
    }

    fn request_scroll_to_bottom(&mut self) {
        if let Err(error) = self.out.flush() {
            tracing::warn!(error = %error, "failed to flush terminal");
        }
    }
}
