mod cli;

use std::io;
use std::path::PathBuf;

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use cloudnode_lib::settings::DEFAULT_SETTINGS_PATH;

#[derive(Parser)]
#[clap(author, version, about = "Make, watch and end short-lived cloud nodes")]
pub struct Opts {
    #[clap(
        long,
        global = true,
        env = "CLOUDNODE_SETTINGS",
        default_value = DEFAULT_SETTINGS_PATH,
        value_name = "FILE",
        help = "settings file"
    )]
    settings: String,
    #[clap(subcommand)]
    command: Command,
}

impl Opts {
    fn settings_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.settings).into_owned())
    }
}

#[derive(Subcommand)]
pub enum Command {
    /// Make a node, wait for it, check who it is and bootstrap it
    Make {
        #[clap(help = "instance type from the settings")]
        config: String,
        #[clap(help = "name of the new node")]
        name: String,
        #[clap(long, help = "don't add an alias to ~/.ssh/config")]
        no_alias: bool,
    },
    /// Delete a node; on a node, defaults to the node itself
    #[clap(name = "endsession")]
    EndSession {
        #[clap(value_name = "PROJECT ZONE INSTANCE", max_values = 3, help = "where the node lives")]
        target: Vec<String>,
    },
    /// List the nodes in a zone
    List {
        #[clap(help = "project id, defaults to the settings")]
        project: Option<String>,
        #[clap(help = "zone, defaults to the settings")]
        zone: Option<String>,
    },
    /// Show everything the cloud knows about a node
    Describe {
        name: String,
        #[clap(short, long, help = "only list the metadata keys")]
        keys: bool,
    },
    /// List the images for every family in the settings
    Images,
    /// Show the metadata a node of this type would get
    #[clap(name = "showmeta")]
    ShowMeta {
        #[clap(help = "instance type from the settings")]
        config: String,
    },
    /// Print where this node lives (on a node only)
    #[clap(name = "printmeta")]
    PrintMeta,
    /// Generate shell completion files
    Completions {
        #[clap(value_parser, help = "bash, elvish, fish, powershell or zsh")]
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    pretty_env_logger::init();

    let opts = Opts::parse();
    let settings = opts.settings_path();

    match opts.command {
        Command::Make {
            config,
            name,
            no_alias,
        } => cli::make(&settings, &config, &name, !no_alias).await,
        Command::EndSession { target } => cli::end_session(&target).await,
        Command::List { project, zone } => cli::list(&settings, project, zone).await,
        Command::Describe { name, keys } => cli::describe(&settings, &name, keys).await,
        Command::Images => cli::images(&settings).await,
        Command::ShowMeta { config } => cli::show_meta(&settings, &config),
        Command::PrintMeta => cli::print_meta().await,
        Command::Completions { shell } => {
            let mut app = Opts::command();
            generate(shell, &mut app, "cloudnode", &mut io::stdout());
            Ok(())
        }
    }
}
