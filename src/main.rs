use anyhow::Context;
use clap::{Parser, Subcommand};
use deckpanel::config::schema::PanelConfig;
use deckpanel::connection::WsConnector;
use deckpanel::edit::{self, DropTarget};
use deckpanel::editor::Editor;
use deckpanel::panel::{self, ButtonPatch, Task};
use deckpanel::probe::{self, Candidate};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

/// deckpanel — control panel for a hotkey button deck hub
#[derive(Parser)]
#[command(name = "deckpanel", version, about)]
struct Cli {
    /// Path to the config file (TOML). Defaults to the platform config dir.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable JSON log output.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a hub address and admin token, then save them.
    Connect {
        #[arg(long)]
        ip: String,
        #[arg(long, default_value = "3000")]
        port: String,
        #[arg(long, default_value = "")]
        token: String,
    },
    /// Forget the saved hub address and token.
    Forget,
    /// Stay connected and log hub activity.
    Watch,
    /// Press a button on the hub.
    Trigger { button_id: String },
    /// Save the active page to the hub.
    Push,
    /// Change one button directly on the hub without saving a page.
    Patch {
        button_id: String,
        #[arg(long)]
        key: String,
        #[arg(long)]
        label: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    /// Manage local pages.
    #[command(subcommand)]
    Page(PageCommand),
    /// Edit buttons on the active page. Changes stay local until `push`.
    #[command(subcommand)]
    Button(ButtonCommand),
    /// Validate config and exit.
    Check,
}

#[derive(Subcommand)]
enum PageCommand {
    List,
    Create,
    /// Switch by page id or name.
    Switch { page: String },
    Rename { page: String, name: String },
    Delete { page: String },
}

#[derive(Subcommand)]
enum ButtonCommand {
    List,
    /// Append a blank button.
    Add,
    /// Insert a blank button at a zero-based grid slot.
    Insert { slot: usize },
    /// Move a button into the slot held by another.
    Move { button: String, over: String },
    Delete { button: String },
    Label { button: String, label: String },
    Key { button: String, key: String },
    Describe { button: String, description: String },
    /// Drop a system hotkey onto a grid slot or an existing button.
    Template {
        template: String,
        #[arg(long, conflicts_with = "button", required_unless_present = "button")]
        cell: Option<usize>,
        #[arg(long)]
        button: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Init tracing.
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("deckpanel=info"));

    if cli.json {
        fmt().with_env_filter(filter).json().init();
    } else {
        fmt().with_env_filter(filter).init();
    }

    info!("deckpanel v{}", env!("CARGO_PKG_VERSION"));

    let config = deckpanel::config::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Command::Check => {
            println!(
                "config OK: grid {}x{}, reconnect every {} ms{}",
                config.grid.cols,
                config.grid.rows,
                config.panel.reconnect_delay_ms,
                config
                    .panel
                    .override_url()
                    .map(|url| format!(", fixed hub {url}"))
                    .unwrap_or_default(),
            );
        }

        Command::Connect { ip, port, token } => {
            let candidate = Candidate::new(&ip, &port, &token)?;
            let store = panel::open_store(&config.panel)?;
            let session = panel::session_store(&config.panel, store);
            probe::probe(
                &WsConnector,
                &session,
                &candidate,
                config.panel.probe_timeout(),
            )
            .await?;
            println!("connected to hub at {}", candidate.host);
        }

        Command::Forget => {
            let store = panel::open_store(&config.panel)?;
            panel::session_store(&config.panel, store).purge()?;
            println!("hub address and token cleared");
        }

        Command::Watch => panel::run(&config, Task::Watch).await?,
        Command::Trigger { button_id } => panel::run(&config, Task::Trigger(button_id)).await?,
        Command::Push => panel::run(&config, Task::Push).await?,
        Command::Patch {
            button_id,
            key,
            label,
            description,
        } => {
            let patch = ButtonPatch {
                button_id,
                key,
                label,
                description,
            };
            panel::run(&config, Task::Patch(patch)).await?;
        }

        Command::Page(command) => run_page_command(&config, command)?,
        Command::Button(command) => run_button_command(&config, command)?,
    }

    Ok(())
}

fn run_page_command(config: &PanelConfig, command: PageCommand) -> anyhow::Result<()> {
    let store = panel::open_store(&config.panel)?;
    let mut editor = panel::editor(config, store);

    match command {
        PageCommand::List => {
            let Some(book) = editor.pages() else {
                println!("no pages yet, run `deckpanel watch` to load the hub configuration");
                return Ok(());
            };
            for page in book.pages() {
                let active = if page.id == book.active_id() { "*" } else { " " };
                let hub = if book.hub_page() == Some(page.id.as_str()) {
                    " (on hub)"
                } else {
                    ""
                };
                println!(
                    "{active} {}  {}  {} buttons{hub}",
                    page.id,
                    page.name,
                    page.order.len()
                );
            }
        }
        PageCommand::Create => {
            let id = editor.create_page()?;
            println!("created page {id}");
        }
        PageCommand::Switch { page } => {
            let id = resolve_page(&editor, &page)?;
            editor.switch_page(&id)?;
            println!("switched to {page}");
        }
        PageCommand::Rename { page, name } => {
            let id = resolve_page(&editor, &page)?;
            if editor.rename_page(&id, &name)? {
                println!("renamed to {}", name.trim());
            } else {
                println!("name is blank, nothing changed");
            }
        }
        PageCommand::Delete { page } => {
            let id = resolve_page(&editor, &page)?;
            if editor.delete_page(&id)? {
                println!("deleted {page}");
            } else {
                println!("the last page cannot be deleted");
            }
        }
    }

    Ok(())
}

fn run_button_command(config: &PanelConfig, command: ButtonCommand) -> anyhow::Result<()> {
    let store = panel::open_store(&config.panel)?;
    let mut editor = panel::editor(config, store);

    match command {
        ButtonCommand::List => {
            let Some(book) = editor.pages() else {
                println!("no pages yet, run `deckpanel watch` to load the hub configuration");
                return Ok(());
            };
            let unsaved = if editor.is_dirty() { " (unsaved)" } else { "" };
            println!("{}{unsaved}", book.active().name);
            let buttons = editor.mirror().buttons();
            for (slot, id) in editor.mirror().order().iter().enumerate() {
                if let Some(button) = buttons.get(id) {
                    println!("{slot:>3}  {id}  {}  [{}]", button.label, button.key);
                }
            }
        }
        ButtonCommand::Add => {
            let id = editor.add_button()?;
            println!("added {id}");
        }
        ButtonCommand::Insert { slot } => {
            let id = editor.insert_button(slot)?;
            println!("inserted {id} at slot {slot}");
        }
        ButtonCommand::Move { button, over } => {
            if editor.move_button(&button, &over)? {
                println!("moved {button}");
            } else {
                println!("nothing to move");
            }
        }
        ButtonCommand::Delete { button } => {
            editor.delete_button(&button)?;
            println!("deleted {button}");
        }
        ButtonCommand::Label { button, label } => {
            editor.set_label(&button, &label)?;
            println!("{button} labelled {label}");
        }
        ButtonCommand::Key { button, key } => {
            editor.set_key(&button, &key)?;
            println!("{button} sends {key}");
        }
        ButtonCommand::Describe { button, description } => {
            editor.set_description(&button, &description)?;
            println!("{button} described");
        }
        ButtonCommand::Template {
            template,
            cell,
            button,
        } => {
            let Some(found) = edit::find_template(&template) else {
                let known: Vec<&str> = edit::SYSTEM_HOTKEYS.iter().map(|t| t.label).collect();
                anyhow::bail!("unknown template '{template}', try one of: {}", known.join(", "));
            };
            let target = match (cell, button) {
                (_, Some(id)) => DropTarget::Button(id),
                (Some(slot), None) => DropTarget::Cell(slot),
                (None, None) => anyhow::bail!("give --cell or --button"),
            };
            let id = editor.drop_template(&target, found)?;
            println!("{} on {id}", found.label);
        }
    }

    Ok(())
}

fn resolve_page(editor: &Editor, page: &str) -> anyhow::Result<String> {
    editor
        .pages()
        .and_then(|book| book.find(page))
        .map(|p| p.id.clone())
        .with_context(|| format!("page not found: {page}"))
}
