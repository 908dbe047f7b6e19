use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the HTTP daemon.
    Daemon {
        /// Override the configured listen address
        #[clap(short, long)]
        listen: Option<String>,
    },

    /// Store the face from an image under a label.
    Add {
        /// Path to the image file
        image: PathBuf,

        /// Label to store the encoding under.
        /// Defaults to the image file name.
        #[clap(short, long)]
        label: Option<String>,
    },

    /// Rank stored faces by similarity to the face in an image.
    Compare {
        /// Path to the image file
        image: PathBuf,

        /// How many matches to return
        #[clap(short, long)]
        top: Option<usize>,
    },

    /// Print the number of stored encodings.
    Total {},
}
