//! Normalizes a GeoJSON boundary file in one pass.
//!
//! Nested feature collections in the `features` list are flattened into plain
//! features, each feature gets its secondary identifier rewritten, and the
//! document is written back.

use std::fmt;
use std::path::{Path, PathBuf};

use geojson::JsonObject;
use tracing::{debug, info};

pub mod document;
pub mod normalizer;

pub use document::{Document, LoadError, OutputFormat, WriteError};
pub use normalizer::{FlattenDepth, FlattenError, Rewrite, RewriteError};

/// Everything a run can be configured with.
#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Where to write the result. Defaults to the input path.
    pub output: Option<PathBuf>,
    pub depth: FlattenDepth,
    pub format: OutputFormat,
    /// Check every output feature with the `geojson` parser before writing.
    pub validate: bool,
    /// Run the whole pipeline but skip the write.
    pub dry_run: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to load {}", .path.display())]
    Load {
        path: PathBuf,
        #[source]
        source: LoadError,
    },
    #[error(transparent)]
    Flatten(#[from] FlattenError),
    #[error("cannot rewrite the identifier of feature {index}")]
    Rewrite {
        index: usize,
        #[source]
        source: RewriteError,
    },
    #[error("feature {index} is not valid GeoJSON")]
    Validate {
        index: usize,
        #[source]
        source: geojson::Error,
    },
    #[error("failed to write {}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: WriteError,
    },
}

/// What a run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Report {
    /// Entries in the input `features` list.
    pub input_entries: usize,
    pub collections: usize,
    /// Type labels of dropped entries.
    pub dropped: Vec<String>,
    pub features: usize,
    pub rewritten: usize,
    /// `None` on a dry run.
    pub written: Option<PathBuf>,
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} features from {} entries ({} collections unwrapped, {} dropped, {} identifiers rewritten)",
            self.features,
            self.input_entries,
            self.collections,
            self.dropped.len(),
            self.rewritten
        )?;
        match &self.written {
            Some(path) => write!(f, ", written to {}", path.display()),
            None => write!(f, ", dry run"),
        }
    }
}

/// Loads `path`, flattens and rewrites its features, and writes the result.
///
/// Nothing is written unless every feature was rewritten (and, with
/// [`Options::validate`], validated) successfully.
pub fn process_file(path: &Path, options: &Options) -> Result<Report, Error> {
    info!("Loading file: {}", path.display());
    let mut document = document::load(path).map_err(|source| Error::Load {
        path: path.to_path_buf(),
        source,
    })?;

    let entries = document.take_features();
    let input_entries = entries.len();
    info!("Found {} entries in file", input_entries);

    let flattened = normalizer::flatten(entries, options.depth)?;
    info!(
        "Flattened {} collections into {} features",
        flattened.collections,
        flattened.features.len()
    );

    let mut features = flattened.features;
    let rewritten = rewrite_all(&mut features)?;
    info!("Rewrote {} identifiers", rewritten);

    if options.validate {
        validate(&features)?;
        info!("All {} features are valid GeoJSON", features.len());
    }

    let mut report = Report {
        input_entries,
        collections: flattened.collections,
        dropped: flattened.unsupported,
        features: features.len(),
        rewritten,
        written: None,
    };
    document.replace_features(features);

    if options.dry_run {
        info!("Dry run, leaving {} untouched", path.display());
        return Ok(report);
    }

    let target = options.output.as_deref().unwrap_or(path);
    document::write(&document, target, options.format).map_err(|source| Error::Write {
        path: target.to_path_buf(),
        source,
    })?;
    info!("Written {}", target.display());

    report.written = Some(target.to_path_buf());
    Ok(report)
}

fn rewrite_all(features: &mut [JsonObject]) -> Result<usize, Error> {
    let mut rewritten = 0;
    for (index, feature) in features.iter_mut().enumerate() {
        let outcome = normalizer::feature_properties(feature)
            .and_then(normalizer::rewrite_identifier)
            .map_err(|source| Error::Rewrite { index, source })?;

        if let Rewrite::Applied { key, value } = outcome {
            debug!(index, %key, %value, "rewrote identifier");
            rewritten += 1;
        }
    }
    Ok(rewritten)
}

fn validate(features: &[JsonObject]) -> Result<(), Error> {
    for (index, feature) in features.iter().enumerate() {
        geojson::Feature::try_from(feature.clone())
            .map_err(|source| Error::Validate { index, source })?;
    }
    Ok(())
}
