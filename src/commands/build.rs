use clap::Parser;
use gallery_rank::Result;
use gallery_rank::catalog::compile::build_catalog;
use gallery_rank::catalog::store::save_json;
use ohno::bail;
use serde_json::Value;
use std::path::PathBuf;

#[derive(Parser, Debug)]
pub struct BuildArgs {
    /// Directory of submission JSON files
    #[arg(long, value_name = "PATH", default_value = "components")]
    pub components_dir: PathBuf,

    /// Component schema file holding the category taxonomy
    #[arg(long, value_name = "PATH", default_value = "schemas/component.schema.json")]
    pub schema: PathBuf,

    /// Output compiled catalog path
    #[arg(long, value_name = "PATH", default_value = "compiled/components.json")]
    pub out: PathBuf,

    /// Previous compiled catalog to carry metrics forward from
    #[arg(long, value_name = "PATH")]
    pub previous: Option<PathBuf>,

    /// Report invalid submissions and keep going instead of failing the build
    #[arg(long)]
    pub skip_invalid: bool,
}

pub fn build(args: &BuildArgs) -> Result<()> {
    let outcome = build_catalog(&args.components_dir, &args.schema, args.previous.as_deref())?;

    if !outcome.errors.is_empty() {
        eprintln!("{} invalid submission(s):", outcome.errors.len());
        for error in &outcome.errors {
            eprintln!("- {error}");
        }
        if !args.skip_invalid {
            bail!("catalog build failed with {} invalid submission(s)", outcome.errors.len());
        }
    }

    let count = outcome.doc.get("components").and_then(Value::as_array).map_or(0, Vec::len);
    save_json(&args.out, &outcome.doc)?;
    println!("Wrote {count} component(s) to {}.", args.out.display());
    Ok(())
}
