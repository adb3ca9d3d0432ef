use clap::Parser;
use gallery_rank::Result;
use gallery_rank::catalog::store::{load_json, save_json};
use gallery_rank::ranking::{RankingConfig, rank_catalog};
use std::path::PathBuf;

#[derive(Parser, Debug)]
pub struct RankArgs {
    /// Input compiled catalog path
    #[arg(long = "in", value_name = "PATH", default_value = "compiled/components.json")]
    pub input: PathBuf,

    /// Output path [default: overwrite the input]
    #[arg(long, value_name = "PATH")]
    pub out: Option<PathBuf>,

    /// Ranking config file
    #[arg(long, value_name = "PATH", default_value = "ranking_config.json")]
    pub config: PathBuf,

    /// Only process the first N components
    #[arg(long, value_name = "COUNT")]
    pub limit: Option<usize>,
}

pub fn rank(args: &RankArgs) -> Result<()> {
    let out = args.out.as_ref().unwrap_or(&args.input);

    let cfg = RankingConfig::load(&args.config)?;
    let mut doc = load_json(&args.input)?;
    let processed = rank_catalog(&mut doc, &cfg, args.limit)?;

    save_json(out, &doc)?;
    println!("Wrote rankings for {processed} component(s) to {}.", out.display());
    Ok(())
}
