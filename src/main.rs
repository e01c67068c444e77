use clap::{Parser, Subcommand};
use gaintax::cmd::{CheckCommand, ComputeCommand, SchemaCommand};

#[derive(Parser, Debug)]
#[command(name = "gaintax", version, about = "Schema-driven capital gains tax calculator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compute a tax result from schemas, a rate table and schedule entries
    Compute(ComputeCommand),
    /// Validate the schema and rate documents without computing
    Check(CheckCommand),
    /// Print expected input formats
    Schema(SchemaCommand),
}

fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();

    let cli = Cli::parse();
    match cli.command {
        Command::Compute(cmd) => cmd.exec(),
        Command::Check(cmd) => cmd.exec(),
        Command::Schema(cmd) => cmd.exec(),
    }
}
