use std::{fs::File, io::BufReader, path::PathBuf};

use anyhow::Context as _;
use clap::Parser;

use framefuse::{ArtifactStore as _, DirStore, Pipeline, PipelineConfig};

#[derive(Parser, Debug)]
#[command(name = "framefuse", version)]
struct Cli {
    /// Input SVG document.
    #[arg(long = "in")]
    in_path: PathBuf,

    /// Pipeline configuration JSON; defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Publish the finished video into this directory and print its locator.
    #[arg(long)]
    publish_dir: Option<PathBuf>,

    /// Base URL prepended to published keys.
    #[arg(long, default_value = "file:///")]
    base_url: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => {
            let f = File::open(path)
                .with_context(|| format!("open config '{}'", path.display()))?;
            serde_json::from_reader::<_, PipelineConfig>(BufReader::new(f))
                .with_context(|| "parse pipeline config JSON")?
        }
        None => PipelineConfig::default(),
    };

    let svg = std::fs::read_to_string(&cli.in_path)
        .with_context(|| format!("read svg '{}'", cli.in_path.display()))?;

    let pipeline = Pipeline::new(config)?;
    let rendered = pipeline.render(&svg).await?;

    if let Some(dir) = cli.publish_dir {
        let store = DirStore::new(dir, cli.base_url);
        let url = store
            .put(&rendered.path, &format!("{}.mp4", rendered.key))
            .await?;
        println!("{url}");
    } else {
        println!("{}", rendered.path.display());
    }

    eprintln!("wrote {}", rendered.path.display());
    Ok(())
}
