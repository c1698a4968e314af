//! Configuration surface (spec §6): the key table an embedder supplies
//! to open a [`crate::Strata`] context, following the teacher's
//! `PagerOptions`/`Default` builder-struct convention rather than a
//! free-form property bag once parsed.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::{Result, StrataError};
use crate::page::VALID_PAGE_SIZES;
use crate::txn::CommitPolicy;

/// Per-page-size buffer pool sizing, either an explicit frame count or a
/// memory budget to derive one from (spec §6 `buffer.count.<N>` /
/// `buffer.memory.<N>`).
#[derive(Clone, Debug)]
pub enum BufferSizing {
    /// Exact frame count (`buffer.count.<N>`).
    Count(usize),
    /// `min,max,reserved,fraction` memory budget (`buffer.memory.<N>`);
    /// the pool's frame count is derived as
    /// `clamp(available*fraction - reserved, min, max) / page_size`.
    Memory {
        /// Minimum bytes to allocate regardless of `fraction`.
        min: usize,
        /// Maximum bytes the pool may ever grow to.
        max: usize,
        /// Bytes carved out for non-pool use before applying `fraction`.
        reserved: usize,
        /// Fraction (0.0-1.0) of remaining memory to devote to this pool.
        fraction: f64,
    },
}

impl BufferSizing {
    /// Resolves the configured sizing into a frame count for a pool of
    /// `page_size` bytes, given `available_bytes` of total budget to
    /// divide `fraction` against.
    pub fn resolve_frame_count(&self, page_size: u32, available_bytes: usize) -> usize {
        match *self {
            BufferSizing::Count(n) => n.max(1),
            BufferSizing::Memory {
                min,
                max,
                reserved,
                fraction,
            } => {
                let usable = available_bytes.saturating_sub(reserved);
                let budget = ((usable as f64) * fraction) as usize;
                let budget = budget.clamp(min, max.max(min));
                (budget / page_size.max(1) as usize).max(1)
            }
        }
    }
}

/// One `volume.<name>` entry (spec §6).
#[derive(Clone, Debug)]
pub struct VolumeSpec {
    /// The volume's directory-relative name, used as its config key.
    pub name: String,
    /// Filesystem path of the volume file.
    pub path: PathBuf,
    /// Page size in bytes; must be one of [`VALID_PAGE_SIZES`] and must
    /// have a configured buffer pool (spec §6, Bug1041293).
    pub page_size: u32,
    /// Initial file size in pages, applied at creation.
    pub initial_size_pages: u64,
    /// Maximum file size in pages; growth past this yields `VolumeFull`.
    pub maximum_size_pages: u64,
    /// Growth increment in pages applied each time the volume extends.
    pub extension_size_pages: u64,
    /// Create the volume file if it is missing.
    pub create: bool,
    /// Fail if the volume file already exists (implies `create`).
    pub create_only: bool,
    /// Open read-only; mutating operations are rejected.
    pub read_only: bool,
    /// In-memory scratch volume: never backed by a file, never
    /// journalled, never assigned a handle (spec §3.5, §11).
    pub temporary: bool,
}

impl VolumeSpec {
    fn validate(&self, configured_pools: &[u32]) -> Result<()> {
        if self.name.is_empty() {
            return Err(StrataError::UnderSpecifiedVolume(
                "volume spec is missing a name".into(),
            ));
        }
        if !self.temporary && self.path.as_os_str().is_empty() {
            return Err(StrataError::UnderSpecifiedVolume(format!(
                "volume {} has no path and is not temporary",
                self.name
            )));
        }
        if !VALID_PAGE_SIZES.contains(&self.page_size) {
            return Err(StrataError::InvalidVolumeSpecification(format!(
                "volume {} requests page size {} which is not one of {:?}",
                self.name, self.page_size, VALID_PAGE_SIZES
            )));
        }
        if !configured_pools.contains(&self.page_size) {
            return Err(StrataError::BufferSizeUnavailable(self.page_size));
        }
        if self.maximum_size_pages < self.initial_size_pages {
            return Err(StrataError::InvalidVolumeSpecification(format!(
                "volume {}: maximum size smaller than initial size",
                self.name
            )));
        }
        Ok(())
    }
}

/// Top-level configuration for a [`crate::Strata`] context (spec §6 key
/// table, parsed rather than left as a property bag).
#[derive(Clone, Debug)]
pub struct Config {
    /// Directory for volumes and, unless `journal_path` overrides it,
    /// the journal (`datapath`).
    pub data_path: PathBuf,
    /// Optional override for the journal's location (`journalpath`).
    pub journal_path: Option<PathBuf>,
    /// Buffer pool sizing per page size (`buffer.count.<N>` /
    /// `buffer.memory.<N>`).
    pub buffer_pools: HashMap<u32, BufferSizing>,
    /// Declared volumes (`volume.<name>`).
    pub volumes: Vec<VolumeSpec>,
    /// Default commit durability policy (`commit_policy`).
    pub commit_policy: CommitPolicy,
    /// Whether to expose a management surface (`jmx`); out of scope for
    /// the storage core proper (spec §1), retained only as a parsed flag
    /// so configuration round-trips without losing the key.
    pub jmx_enabled: bool,
    /// Optional management RPC port (`rmiport`).
    pub rmi_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        let mut buffer_pools = HashMap::new();
        buffer_pools.insert(16384, BufferSizing::Count(256));
        Self {
            data_path: PathBuf::from("."),
            journal_path: None,
            buffer_pools,
            volumes: Vec::new(),
            commit_policy: CommitPolicy::Hard,
            jmx_enabled: false,
            rmi_port: None,
        }
    }
}

impl Config {
    /// The effective journal directory: `journal_path` if set, else
    /// `data_path`.
    pub fn journal_dir(&self) -> PathBuf {
        self.journal_path.clone().unwrap_or_else(|| self.data_path.clone())
    }

    /// Validates every declared volume against the configured buffer
    /// pools, failing fast rather than panicking on an unsupported page
    /// size (spec §6, Bug1041293).
    pub fn validate(&self) -> Result<()> {
        let configured_pools: Vec<u32> = self.buffer_pools.keys().copied().collect();
        for spec in &self.volumes {
            spec.validate(&configured_pools)?;
        }
        Ok(())
    }

    /// Parses a flat `key = value` properties map into a `Config`,
    /// following the key names in spec §6. Unknown keys are ignored;
    /// malformed values raise [`StrataError::InvalidVolumeSpecification`].
    pub fn from_properties(props: &HashMap<String, String>) -> Result<Self> {
        let mut config = Config {
            buffer_pools: HashMap::new(),
            ..Config::default()
        };
        if let Some(path) = props.get("datapath") {
            config.data_path = PathBuf::from(path);
        }
        if let Some(path) = props.get("journalpath") {
            config.journal_path = Some(PathBuf::from(path));
        }
        if let Some(policy) = props.get("commit_policy") {
            config.commit_policy = match policy.to_ascii_uppercase().as_str() {
                "SOFT" => CommitPolicy::Soft,
                "HARD" => CommitPolicy::Hard,
                "GROUP" => CommitPolicy::Group,
                other => {
                    return Err(StrataError::InvalidVolumeSpecification(format!(
                        "unknown commit_policy {other}"
                    )))
                }
            };
        }
        config.jmx_enabled = props
            .get("jmx")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);
        config.rmi_port = props
            .get("rmiport")
            .map(|v| {
                v.parse::<u16>().map_err(|_| {
                    StrataError::InvalidVolumeSpecification(format!("invalid rmiport {v}"))
                })
            })
            .transpose()?;

        for (key, value) in props {
            if let Some(size_str) = key.strip_prefix("buffer.count.") {
                let page_size = parse_page_size(size_str)?;
                let count: usize = value.parse().map_err(|_| {
                    StrataError::InvalidVolumeSpecification(format!(
                        "invalid buffer.count.{size_str} value {value}"
                    ))
                })?;
                config
                    .buffer_pools
                    .insert(page_size, BufferSizing::Count(count));
            } else if let Some(size_str) = key.strip_prefix("buffer.memory.") {
                let page_size = parse_page_size(size_str)?;
                let parts: Vec<&str> = value.split(',').collect();
                if parts.len() != 4 {
                    return Err(StrataError::InvalidVolumeSpecification(format!(
                        "buffer.memory.{size_str} expects min,max,reserved,fraction, got {value}"
                    )));
                }
                let parse_usize = |s: &str| {
                    s.trim().parse::<usize>().map_err(|_| {
                        StrataError::InvalidVolumeSpecification(format!(
                            "invalid buffer.memory.{size_str} component {s}"
                        ))
                    })
                };
                let min = parse_usize(parts[0])?;
                let max = parse_usize(parts[1])?;
                let reserved = parse_usize(parts[2])?;
                let fraction: f64 = parts[3].trim().parse().map_err(|_| {
                    StrataError::InvalidVolumeSpecification(format!(
                        "invalid buffer.memory.{size_str} fraction {}",
                        parts[3]
                    ))
                })?;
                config.buffer_pools.insert(
                    page_size,
                    BufferSizing::Memory {
                        min,
                        max,
                        reserved,
                        fraction,
                    },
                );
            } else if let Some(name) = key.strip_prefix("volume.") {
                config.volumes.push(parse_volume_spec(name, value)?);
            }
        }
        if config.buffer_pools.is_empty() {
            config.buffer_pools = Config::default().buffer_pools;
        }
        config.validate()?;
        Ok(config)
    }
}

fn parse_page_size(s: &str) -> Result<u32> {
    s.parse::<u32>().map_err(|_| {
        StrataError::InvalidVolumeSpecification(format!("invalid page size component {s}"))
    })
}

/// Parses a `volume.<name>` value of the form
/// `path=...,pageSize=...,initialSize=...,maximumSize=...,extensionSize=...,create=bool,createOnly=bool,readOnly=bool,temporary=bool`.
fn parse_volume_spec(name: &str, value: &str) -> Result<VolumeSpec> {
    let mut spec = VolumeSpec {
        name: name.to_string(),
        path: PathBuf::new(),
        page_size: 16384,
        initial_size_pages: 100,
        maximum_size_pages: 100_000,
        extension_size_pages: 100,
        create: false,
        create_only: false,
        read_only: false,
        temporary: false,
    };
    for field in value.split(',') {
        let Some((key, val)) = field.split_once('=') else {
            continue;
        };
        let (key, val) = (key.trim(), val.trim());
        match key {
            "path" => spec.path = PathBuf::from(val),
            "pageSize" => spec.page_size = parse_page_size(val)?,
            "initialSize" => spec.initial_size_pages = parse_pages(val, "initialSize")?,
            "maximumSize" => spec.maximum_size_pages = parse_pages(val, "maximumSize")?,
            "extensionSize" => spec.extension_size_pages = parse_pages(val, "extensionSize")?,
            "create" => spec.create = val == "true",
            "createOnly" => spec.create_only = val == "true",
            "readOnly" => spec.read_only = val == "true",
            "temporary" => spec.temporary = val == "true",
            _ => {}
        }
    }
    if spec.create_only {
        spec.create = true;
    }
    Ok(spec)
}

fn parse_pages(val: &str, field: &str) -> Result<u64> {
    val.parse::<u64>()
        .map_err(|_| StrataError::InvalidVolumeSpecification(format!("invalid {field} value {val}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn parses_datapath_and_commit_policy() {
        let config = Config::from_properties(&props(&[
            ("datapath", "/var/lib/strata"),
            ("commit_policy", "GROUP"),
        ]))
        .unwrap();
        assert_eq!(config.data_path, PathBuf::from("/var/lib/strata"));
        assert_eq!(config.commit_policy, CommitPolicy::Group);
    }

    #[test]
    fn parses_buffer_count_and_memory_keys() {
        let config = Config::from_properties(&props(&[
            ("buffer.count.4096", "512"),
            ("buffer.memory.16384", "1000000,8000000,2000000,0.5"),
        ]))
        .unwrap();
        assert!(matches!(
            config.buffer_pools.get(&4096),
            Some(BufferSizing::Count(512))
        ));
        assert!(matches!(
            config.buffer_pools.get(&16384),
            Some(BufferSizing::Memory { .. })
        ));
    }

    #[test]
    fn rejects_volume_with_unconfigured_page_size() {
        let config = Config::from_properties(&props(&[
            ("buffer.count.4096", "8"),
            (
                "volume.main",
                "path=/tmp/main.strata,pageSize=16384,create=true",
            ),
        ]));
        assert!(matches!(
            config,
            Err(StrataError::BufferSizeUnavailable(16384))
        ));
    }

    #[test]
    fn rejects_invalid_page_size_value() {
        let config = Config::from_properties(&props(&[(
            "volume.main",
            "path=/tmp/main.strata,pageSize=3000,create=true",
        )]));
        assert!(matches!(
            config,
            Err(StrataError::InvalidVolumeSpecification(_))
        ));
    }

    #[test]
    fn temporary_volume_skips_path_requirement() {
        let config = Config::from_properties(&props(&[
            ("buffer.count.4096", "8"),
            ("volume.scratch", "pageSize=4096,temporary=true"),
        ]))
        .unwrap();
        assert_eq!(config.volumes.len(), 1);
        assert!(config.volumes[0].temporary);
    }
}
