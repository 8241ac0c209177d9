// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # subgraph-rt
//!
//! Command-line interface for the partitioned subgraph runtime.
//!
//! ## Usage
//! ```bash
//! # Run a synthetic partitioned model through the host backend
//! subgraph-rt demo --calls 8 --funcall-async --iterations 4
//!
//! # Exercise the spatial executor with a tail slice
//! subgraph-rt demo --spatial-range 10 --spatial-nway 4
//!
//! # Print the synthetic model's structure and device distribution
//! subgraph-rt inspect --calls 8
//! ```

mod commands;
mod synthetic;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "subgraph-rt",
    about = "Partitioned subgraph inference runtime demo",
    version
)]
struct Cli {
    /// Enable verbose logging (repeat for more: -v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run inferences over a synthetic partitioned model.
    Demo {
        /// Number of function-call sites sharing one body.
        #[arg(long, default_value_t = 4)]
        calls: usize,

        /// Width of the activation tensors.
        #[arg(long, default_value_t = 16)]
        width: usize,

        /// Enable funcall pipelining (double-buffered subrequests).
        #[arg(long)]
        funcall_async: bool,

        /// Per-submodel gate forcing copied input binding ("YES", "NO",
        /// or a comma-separated index list).
        #[arg(long, default_value = "")]
        input_copy: String,

        /// Number of inferences to run.
        #[arg(long, default_value_t = 1)]
        iterations: usize,

        /// Run the body spatially over this range (0 disables).
        #[arg(long, default_value_t = 0)]
        spatial_range: usize,

        /// Spatial block width.
        #[arg(long, default_value_t = 4)]
        spatial_nway: usize,
    },

    /// Print the synthetic model structure and device distribution.
    Inspect {
        /// Number of function-call sites sharing one body.
        #[arg(long, default_value_t = 4)]
        calls: usize,

        /// Width of the activation tensors.
        #[arg(long, default_value_t = 16)]
        width: usize,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    commands::init_tracing(cli.verbose);

    match cli.command {
        Commands::Demo {
            calls,
            width,
            funcall_async,
            input_copy,
            iterations,
            spatial_range,
            spatial_nway,
        } => commands::demo::execute(
            calls,
            width,
            funcall_async,
            input_copy,
            iterations,
            spatial_range,
            spatial_nway,
        ),
        Commands::Inspect { calls, width } => commands::inspect::execute(calls, width),
    }
}
