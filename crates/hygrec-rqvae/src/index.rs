//! Index generation: catalog features to semantic IDs.
//!
//! The frozen model encodes the whole catalog with nearest-centroid lookup.
//! Items that end up sharing a full code tuple are then re-encoded together,
//! group by group, with Sinkhorn routing on the last level so that the group
//! spreads over distinct final codes. Rounds repeat until no collision is
//! left, a round changes nothing, or `max_rounds` is reached. Remaining
//! collisions are reported, never fatal.
//!
//! The index file maps item id to its code tuple, either as integers
//! (`{"0": [12, 3, 200]}`) or as tokens (`{"0": ["<a_12>", "<b_3>", "<c_200>"]}`).

use burn::tensor::backend::Backend;
use hygrec_core::metrics::{collision_groups, collision_rate, n_colliding_items};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::error::{Result, RqVaeError};
use crate::loader::ItemCatalog;
use crate::model::RqVae;
use crate::quantizer::Assignment;

/// Settings of [`IndexGenerator`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IndexGeneratorConfig {
    /// Items encoded per forward pass
    pub batch_size: usize,
    pub resolve_collisions: bool,
    pub max_rounds: usize,
    /// Sinkhorn epsilon of the last level during resolution
    pub resolution_epsilon: f64,
}

impl Default for IndexGeneratorConfig {
    fn default() -> Self {
        Self {
            batch_size: 1024,
            resolve_collisions: true,
            max_rounds: 20,
            resolution_epsilon: 0.003,
        }
    }
}

impl IndexGeneratorConfig {
    pub const fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub const fn with_resolution(mut self, enabled: bool) -> Self {
        self.resolve_collisions = enabled;
        self
    }

    pub const fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    pub const fn with_resolution_epsilon(mut self, epsilon: f64) -> Self {
        self.resolution_epsilon = epsilon;
        self
    }
}

/// Layout of the index file values.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum IndexFormat {
    /// `[12, 3, 200]`
    #[default]
    Codes,
    /// `["<a_12>", "<b_3>", "<c_200>"]`
    Tokens,
}

impl IndexFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "codes" | "ints" => Some(Self::Codes),
            "tokens" => Some(Self::Tokens),
            _ => None,
        }
    }
}

/// Token of `code` at `level`: `<a_12>` for level 0, `<b_3>` for level 1, ...
pub fn level_token(level: usize, code: usize) -> String {
    if level < 26 {
        format!("<{}_{}>", (b'a' + level as u8) as char, code)
    } else {
        format!("<l{}_{}>", level, code)
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum IndexEntry {
    Codes(Vec<usize>),
    Tokens(Vec<String>),
}

/// Code tuples of a catalog, in catalog order.
#[derive(Clone, Debug, PartialEq)]
pub struct SemanticIndex {
    ids: Vec<String>,
    codes: Vec<Vec<usize>>,
}

impl SemanticIndex {
    pub fn new(ids: Vec<String>, codes: Vec<Vec<usize>>) -> Result<Self> {
        if ids.len() != codes.len() {
            return Err(RqVaeError::DimensionMismatch {
                expected: ids.len(),
                got: codes.len(),
            });
        }
        Ok(Self { ids, codes })
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn codes(&self) -> &[Vec<usize>] {
        &self.codes
    }

    /// Code tuple of an item id.
    pub fn get(&self, id: &str) -> Option<&[usize]> {
        self.ids
            .iter()
            .position(|i| i == id)
            .map(|pos| self.codes[pos].as_slice())
    }

    pub fn collision_rate(&self) -> f64 {
        collision_rate(&self.codes)
    }

    /// Row positions of items sharing a tuple.
    pub fn collision_groups(&self) -> Vec<Vec<usize>> {
        collision_groups(&self.codes)
    }

    /// Tokens of the item at row `position`.
    pub fn tokens(&self, position: usize) -> Vec<String> {
        self.codes
            .get(position)
            .map(|codes| {
                codes
                    .iter()
                    .enumerate()
                    .map(|(level, &code)| level_token(level, code))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every distinct token in the index, ordered by level then code.
    pub fn vocabulary(&self) -> Vec<String> {
        let mut pairs: Vec<(usize, usize)> = self
            .codes
            .iter()
            .flat_map(|codes| codes.iter().copied().enumerate())
            .collect();
        pairs.sort_unstable();
        pairs.dedup();
        pairs
            .into_iter()
            .map(|(level, code)| level_token(level, code))
            .collect()
    }

    pub fn to_json(&self, format: IndexFormat) -> Result<String> {
        let map: IndexMap<&str, IndexEntry> = self
            .ids
            .iter()
            .enumerate()
            .map(|(pos, id)| {
                let entry = match format {
                    IndexFormat::Codes => IndexEntry::Codes(self.codes[pos].clone()),
                    IndexFormat::Tokens => IndexEntry::Tokens(self.tokens(pos)),
                };
                (id.as_str(), entry)
            })
            .collect();
        Ok(serde_json::to_string_pretty(&map)?)
    }

    pub fn write_json(&self, path: &Path, format: IndexFormat) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_json(format)?)?;
        log::info!("Wrote {} semantic IDs to {}", self.len(), path.display());
        Ok(())
    }

    /// Read an index file in either format.
    pub fn read_json(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let map: IndexMap<String, IndexEntry> = serde_json::from_str(&content)?;

        let mut ids = Vec::with_capacity(map.len());
        let mut codes = Vec::with_capacity(map.len());
        for (id, entry) in map {
            let tuple = match entry {
                IndexEntry::Codes(c) => c,
                IndexEntry::Tokens(tokens) => tokens
                    .iter()
                    .map(|t| parse_token(t))
                    .collect::<Result<Vec<_>>>()?,
            };
            ids.push(id);
            codes.push(tuple);
        }
        Self::new(ids, codes)
    }
}

/// Code of a `<x_N>` token.
fn parse_token(token: &str) -> Result<usize> {
    token
        .strip_prefix('<')
        .and_then(|t| t.strip_suffix('>'))
        .and_then(|t| t.rsplit_once('_'))
        .and_then(|(_, code)| code.parse().ok())
        .ok_or_else(|| RqVaeError::InvalidConfig(format!("malformed semantic token `{token}`")))
}

/// Summary of an index generation run.
#[derive(Clone, Debug, PartialEq)]
pub struct IndexReport {
    pub n_items: usize,
    pub n_levels: usize,
    /// Collision rate of the plain nearest-centroid pass
    pub initial_collision_rate: f64,
    pub final_collision_rate: f64,
    /// Resolution rounds that ran
    pub rounds: usize,
    /// Items still sharing a tuple
    pub n_colliding_items: usize,
}

impl fmt::Display for IndexReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Index Report")?;
        writeln!(f, "  Items: {} ({} levels)", self.n_items, self.n_levels)?;
        writeln!(
            f,
            "  Collision rate: {:.4} -> {:.4}",
            self.initial_collision_rate, self.final_collision_rate
        )?;
        writeln!(f, "  Resolution rounds: {}", self.rounds)?;
        write!(f, "  Colliding items: {}", self.n_colliding_items)
    }
}

/// Encode all rows of `catalog` in batches with `plan`.
pub fn encode_catalog<B: Backend>(
    model: &RqVae<B>,
    catalog: &ItemCatalog,
    batch_size: usize,
    plan: &[Assignment],
    device: &B::Device,
) -> Vec<Vec<usize>> {
    let rows: Vec<usize> = (0..catalog.len()).collect();
    let mut codes = Vec::with_capacity(catalog.len());
    for chunk in rows.chunks(batch_size.max(1)) {
        let batch = catalog.batch::<B>(chunk, device);
        codes.extend(model.encode_codes(batch, plan));
    }
    codes
}

/// Runs a frozen model over a catalog and produces its [`SemanticIndex`].
pub struct IndexGenerator<'a, B: Backend> {
    model: &'a RqVae<B>,
    config: IndexGeneratorConfig,
    device: B::Device,
}

impl<'a, B: Backend> IndexGenerator<'a, B> {
    pub fn new(model: &'a RqVae<B>, config: IndexGeneratorConfig, device: &B::Device) -> Self {
        Self {
            model,
            config,
            device: device.clone(),
        }
    }

    /// Encode `catalog` and resolve collisions.
    ///
    /// # Errors
    ///
    /// `DimensionMismatch` when the catalog's feature dimension differs from
    /// the model input.
    pub fn generate(&self, catalog: &ItemCatalog) -> Result<(SemanticIndex, IndexReport)> {
        if catalog.dim() != self.model.in_dim() {
            return Err(RqVaeError::DimensionMismatch {
                expected: self.model.in_dim(),
                got: catalog.dim(),
            });
        }

        let nearest = self.model.nearest_plan();
        let mut codes = encode_catalog(
            self.model,
            catalog,
            self.config.batch_size,
            &nearest,
            &self.device,
        );
        let initial_collision_rate = collision_rate(&codes);
        log::info!(
            "Encoded {} items, collision rate {:.4}",
            codes.len(),
            initial_collision_rate
        );

        let mut rounds = 0;
        if self.config.resolve_collisions {
            let plan = self.model.resolution_plan(self.config.resolution_epsilon);
            while rounds < self.config.max_rounds {
                let groups = collision_groups(&codes);
                if groups.is_empty() {
                    break;
                }

                let mut changed = false;
                for group in &groups {
                    let batch = catalog.batch::<B>(group, &self.device);
                    let resolved = self.model.encode_codes(batch, &plan);
                    for (&item, tuple) in group.iter().zip(resolved) {
                        if codes[item] != tuple {
                            codes[item] = tuple;
                            changed = true;
                        }
                    }
                }
                rounds += 1;
                log::info!(
                    "Resolution round {}: {} groups, collision rate {:.4}",
                    rounds,
                    groups.len(),
                    collision_rate(&codes)
                );
                if !changed {
                    log::warn!("Resolution round {} changed no codes, stopping", rounds);
                    break;
                }
            }
        }

        let report = IndexReport {
            n_items: codes.len(),
            n_levels: self.model.n_levels(),
            initial_collision_rate,
            final_collision_rate: collision_rate(&codes),
            rounds,
            n_colliding_items: n_colliding_items(&codes),
        };
        let index = SemanticIndex::new(catalog.ids().to_vec(), codes)?;
        Ok((index, report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_index() -> SemanticIndex {
        SemanticIndex::new(
            vec!["i0".into(), "i1".into(), "i2".into()],
            vec![vec![1, 2, 3], vec![1, 2, 3], vec![0, 5, 7]],
        )
        .expect("index")
    }

    #[test]
    fn test_level_token() {
        assert_eq!(level_token(0, 12), "<a_12>");
        assert_eq!(level_token(2, 0), "<c_0>");
        assert_eq!(level_token(27, 4), "<l27_4>");
    }

    #[test]
    fn test_tokens_and_vocabulary() {
        let index = sample_index();
        assert_eq!(index.tokens(2), vec!["<a_0>", "<b_5>", "<c_7>"]);
        assert!(index.tokens(9).is_empty());
        assert_eq!(
            index.vocabulary(),
            vec!["<a_0>", "<a_1>", "<b_2>", "<b_5>", "<c_3>", "<c_7>"]
        );
    }

    #[test]
    fn test_collisions() {
        let index = sample_index();
        assert_eq!(index.collision_groups(), vec![vec![0, 1]]);
        assert!((index.collision_rate() - 1.0 / 3.0).abs() < 1e-12);
        assert_eq!(index.get("i2"), Some(&[0, 5, 7][..]));
        assert_eq!(index.get("missing"), None);
    }

    #[test]
    fn test_json_formats_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let index = sample_index();

        for format in [IndexFormat::Codes, IndexFormat::Tokens] {
            let path = dir.path().join(format!("{format:?}.index.json"));
            index.write_json(&path, format).expect("write");
            assert_eq!(SemanticIndex::read_json(&path).expect("read"), index);
        }

        let json = index.to_json(IndexFormat::Codes).expect("json");
        let first_key = json.find("\"i0\"").expect("i0");
        let last_key = json.find("\"i2\"").expect("i2");
        assert!(first_key < last_key, "catalog order is kept");
    }

    #[test]
    fn test_malformed_token() {
        assert!(parse_token("<a_x>").is_err());
        assert!(parse_token("a_1").is_err());
        assert_eq!(parse_token("<d_42>").expect("token"), 42);
    }

    #[test]
    fn test_mismatched_lengths() {
        assert!(SemanticIndex::new(vec!["a".into()], vec![]).is_err());
    }

    #[test]
    fn test_report_display() {
        let report = IndexReport {
            n_items: 10,
            n_levels: 3,
            initial_collision_rate: 0.4,
            final_collision_rate: 0.0,
            rounds: 2,
            n_colliding_items: 0,
        };
        let text = report.to_string();
        assert!(text.contains("0.4000 -> 0.0000"));
        assert!(text.contains("Resolution rounds: 2"));
    }
}
