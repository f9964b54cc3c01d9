use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;

use std::net::SocketAddr;
use std::path::PathBuf;

use light_minded::config::{load_config, write_default_config, DEFAULT_CONFIG_PATH};
use light_minded::logging::init_logging;
use light_minded::mesh_export::{export_atlas_meshes, MeshExportOptions};
use light_minded::pipeline::launch;
use light_minded::region_table::{annotate_file, fill_table_file, NetworkColumn};
use light_minded::server::{serve, VIEWER_FILE};

#[derive(Debug, Parser)]
#[command(name = "light-minded", version, about = "Brain atlas meshes, region tables and text-to-brain-map queries.")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum NetworkKind {
    /// The network name column.
    Name,
    /// The numeric 7-network id column.
    Id,
}

impl NetworkKind {
    fn column(self) -> NetworkColumn {
        match self {
            NetworkKind::Name => NetworkColumn::NAME,
            NetworkKind::Id => NetworkColumn::ID,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Write the default settings file.
    Config,
    /// Run the query pipeline with the saved settings.
    Launch,
    /// Add a network column from a CSV lookup table to a markdown region table.
    Annotate {
        table: PathBuf,
        csv: PathBuf,
        output: PathBuf,
        #[arg(long, value_enum, default_value_t = NetworkKind::Name)]
        column: NetworkKind,
    },
    /// Fill blank lobe and gyrus cells of a markdown region table.
    FillTable {
        input: PathBuf,
        output: PathBuf,
    },
    /// Export every region of an atlas volume as a mesh for the web viewer.
    ExportMeshes {
        atlas: PathBuf,
        /// Joined region table with network columns, attached as region metadata.
        #[arg(long)]
        table: Option<PathBuf>,
        #[arg(long, default_value = "web/webgl_output")]
        output_dir: PathBuf,
        #[arg(long)]
        stl: bool,
        #[arg(long)]
        ply: bool,
        /// Use world coordinates instead of voxel indices.
        #[arg(long)]
        world: bool,
        /// Do not write the viewer page next to the output directory.
        #[arg(long)]
        no_viewer: bool,
    },
    /// Serve the viewer, the meshes and the region colors.
    Serve {
        #[arg(long, default_value = "127.0.0.1:8000")]
        addr: SocketAddr,
        #[arg(long, default_value = "web")]
        web_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging("info");
    let cli = Cli::parse();
    info!("Welcome to light-minded!");

    match cli.command {
        Command::Config => {
            write_default_config(DEFAULT_CONFIG_PATH)?;
        }
        Command::Launch => {
            let settings = load_config(DEFAULT_CONFIG_PATH)?;
            let output = launch(&settings).await.context("Query pipeline failed")?;
            info!("{}", output);
        }
        Command::Annotate { table, csv, output, column } => {
            annotate_file(&table, &csv, &output, column.column())
                .with_context(|| format!("Could not annotate '{}'", table.display()))?;
            info!("Wrote annotated table to '{}'", output.display());
        }
        Command::FillTable { input, output } => {
            fill_table_file(&input, &output)
                .with_context(|| format!("Could not fill '{}'", input.display()))?;
            info!("Wrote filled table to '{}'", output.display());
        }
        Command::ExportMeshes { atlas, table, output_dir, stl, ply, world, no_viewer } => {
            let viewer_page = if no_viewer {
                None
            } else {
                Some(output_dir.parent().map(|p| p.join(VIEWER_FILE)).unwrap_or_else(|| PathBuf::from(VIEWER_FILE)))
            };
            let options = MeshExportOptions {
                output_dir,
                write_stl: stl,
                write_ply: ply,
                world_coordinates: world,
                viewer_page,
            };
            let index = export_atlas_meshes(&atlas, table.as_ref(), &options)
                .with_context(|| format!("Could not export meshes of '{}'", atlas.display()))?;
            info!("{}", index);
        }
        Command::Serve { addr, web_dir } => {
            serve(addr, &web_dir).await?;
        }
    }
    Ok(())
}
