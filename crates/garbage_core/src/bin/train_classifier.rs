use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use garbage_core::{AppConfig, TrainProgress, get_device, train};

/// Train the garbage classifier head on a frozen VGG16 backbone.
#[derive(Debug, Parser)]
#[command(name = "train_classifier")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file (defaults to $GARBAGE_SORTER_CONFIG, then ./garbage_sorter.toml)
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt::init();

    let config = AppConfig::load(args.config.as_deref()).context("failed to load configuration")?;
    let cfg = config.training;
    tracing::info!(
        "Training {} epochs, batch size {}, backbone {}",
        cfg.epochs,
        cfg.batch_size,
        cfg.backbone_path.display()
    );

    let device = get_device();
    let report = train(&cfg, &device, |event| {
        if let TrainProgress::Batch {
            epoch,
            batch,
            batches,
            loss,
        } = event
        {
            tracing::debug!("epoch {epoch} batch {batch}/{batches}: loss {loss:.4}");
        }
    })
    .context("training failed")?;

    if let Some(last) = report.last() {
        tracing::info!(
            "Finished: {} classes, final val_accuracy {:.4}, model at {}",
            report.classes.len(),
            last.val_accuracy,
            cfg.output_path.display()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    #[test]
    fn config_path_is_optional() {
        let args = Args::try_parse_from(["train_classifier"]).unwrap();
        assert_eq!(args.config, None);

        let args = Args::try_parse_from(["train_classifier", "run.toml"]).unwrap();
        assert_eq!(args.config, Some(PathBuf::from("run.toml")));
    }

    #[test]
    fn help_is_not_taken_as_a_config_path() {
        let err = Args::try_parse_from(["train_classifier", "--help"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DisplayHelp);
    }

    #[test]
    fn extra_arguments_are_rejected() {
        assert!(Args::try_parse_from(["train_classifier", "run.toml", "extra"]).is_err());
    }
}
