//! Image resolution: architecture mapping, catalog seam, selection policy
//!
//! This module turns an architecture tag into a catalog filter, queries the
//! image catalog through the [`ImageCatalog`] trait, and applies the
//! selection policy: sort by name descending (names carry a zero-padded
//! `YYYY.MM.Ver` version token, so lexical order approximates recency),
//! skip prerelease entries, take the first survivor.
//!
//! The catalog itself is an external collaborator. [`Ec2ImageCatalog`] is
//! the production implementation; tests substitute a mock.

mod ec2;

pub use ec2::Ec2ImageCatalog;

use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

use crate::{Error, Result};

/// Owner id that publishes the GPU (graphics HVM) image line
pub const GRAPHICS_IMAGE_OWNER: &str = "679593333241";

/// Owner alias for the generic trusted publisher
pub const TRUSTED_IMAGE_OWNER: &str = "amazon";

/// Supported instance architecture tags
///
/// Each tag maps to a fixed catalog name pattern and owner. The mapping is
/// immutable; an input tag outside this enumeration never matches anything
/// and resolution fails.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Architecture {
    /// Paravirtual, 64-bit
    Pv64,
    /// Hardware-virtualized, 64-bit, general purpose
    Hvm64,
    /// Hardware-virtualized with GPU graphics
    Hvmg2,
}

impl Architecture {
    /// All supported tags, in wire order
    pub const ALL: [Self; 3] = [Self::Pv64, Self::Hvm64, Self::Hvmg2];

    /// Catalog name pattern for this architecture
    pub fn name_pattern(&self) -> &'static str {
        match self {
            Self::Pv64 => "amzn-ami-pv*.x86_64-ebs",
            Self::Hvm64 => "amzn-ami-hvm*.x86_64-gp2",
            Self::Hvmg2 => "amzn-ami-graphics-hvm-*x86_64-ebs*",
        }
    }

    /// Catalog owner to restrict the query to
    ///
    /// The graphics image line is published under a dedicated account id;
    /// everything else comes from the generic trusted publisher.
    pub fn owner(&self) -> &'static str {
        match self {
            Self::Hvmg2 => GRAPHICS_IMAGE_OWNER,
            _ => TRUSTED_IMAGE_OWNER,
        }
    }
}

impl std::str::FromStr for Architecture {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        // Tags are matched exactly; "hvm64" is as unknown as "SPARC".
        match s {
            "PV64" => Ok(Self::Pv64),
            "HVM64" => Ok(Self::Hvm64),
            "HVMG2" => Ok(Self::Hvmg2),
            _ => Err(Error::no_qualifying_image(format!(
                "unknown architecture tag: {s}"
            ))),
        }
    }
}

impl std::fmt::Display for Architecture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pv64 => write!(f, "PV64"),
            Self::Hvm64 => write!(f, "HVM64"),
            Self::Hvmg2 => write!(f, "HVMG2"),
        }
    }
}

/// A catalog query: name pattern, owner, and optional region override
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageFilter {
    /// Glob-style name pattern the catalog matches image names against
    pub name_pattern: String,
    /// Owner id or alias the query is restricted to
    pub owner: String,
    /// Region whose catalog to query; `None` falls back to the platform default
    pub region: Option<String>,
}

impl ImageFilter {
    /// Build the filter for an architecture from the fixed mapping table
    pub fn for_architecture(arch: Architecture) -> Self {
        Self {
            name_pattern: arch.name_pattern().to_string(),
            owner: arch.owner().to_string(),
            region: None,
        }
    }

    /// Set the region whose catalog should be queried
    pub fn in_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }
}

/// One machine image record returned by the catalog
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageRecord {
    /// Opaque image identifier (e.g. "ami-0abcd1234")
    pub id: String,
    /// Image name; encodes a sortable version token
    pub name: String,
}

/// Image catalog listing capability
///
/// External collaborator: the production implementation queries the cloud
/// provider's registry, tests mock it. The returned set is unordered; the
/// selection policy owns ordering.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ImageCatalog: Send + Sync {
    /// List images matching the filter
    ///
    /// # Arguments
    ///
    /// * `filter` - Name pattern, owner, and optional region for the query
    async fn list_images(&self, filter: &ImageFilter) -> Result<Vec<ImageRecord>>;
}

/// True if the image name marks a prerelease build
///
/// Prerelease markers are "beta" and ".rc", matched case-insensitively
/// anywhere in the name.
pub fn is_prerelease(name: &str) -> bool {
    let lowered = name.to_lowercase();
    lowered.contains("beta") || lowered.contains(".rc")
}

/// Apply the selection policy to an unordered set of catalog entries
///
/// Sorts by name descending and returns the first non-prerelease entry,
/// or `None` if nothing qualifies.
pub fn select_latest(mut entries: Vec<ImageRecord>) -> Option<ImageRecord> {
    entries.sort_by(|a, b| b.name.cmp(&a.name));
    entries.into_iter().find(|entry| !is_prerelease(&entry.name))
}

/// Resolve the latest qualifying image for an architecture tag
///
/// Builds the catalog filter from the fixed mapping, queries the catalog,
/// and applies the selection policy. An unknown or absent tag fails the
/// same way an empty result set does.
///
/// # Arguments
///
/// * `architecture` - Raw architecture tag from the resource properties
/// * `region` - Region override from the resource properties
/// * `catalog` - Catalog listing collaborator
pub async fn resolve_latest<C>(
    architecture: Option<&str>,
    region: Option<&str>,
    catalog: &C,
) -> Result<ImageRecord>
where
    C: ImageCatalog + ?Sized,
{
    let tag = architecture
        .ok_or_else(|| Error::no_qualifying_image("no architecture tag in resource properties"))?;
    let arch: Architecture = tag.parse()?;

    let mut filter = ImageFilter::for_architecture(arch);
    if let Some(region) = region {
        filter = filter.in_region(region);
    }

    tracing::debug!(
        architecture = %arch,
        pattern = %filter.name_pattern,
        owner = %filter.owner,
        "querying image catalog"
    );

    let entries = catalog.list_images(&filter).await?;
    tracing::debug!(count = entries.len(), "catalog returned entries");

    select_latest(entries).ok_or_else(|| {
        Error::no_qualifying_image(format!(
            "no non-prerelease image matched pattern {} for owner {}",
            filter.name_pattern, filter.owner
        ))
    })
}
