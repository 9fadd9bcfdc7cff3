use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    /// Scale the box (and its landmarks) by `factor`.
    ///
    /// Detection runs on a downscaled frame; consumers working at full
    /// resolution call this with the inverse of the downscale ratio.
    pub fn scaled(&self, factor: f32) -> Self {
        Self {
            x: self.x * factor,
            y: self.y * factor,
            width: self.width * factor,
            height: self.height * factor,
            confidence: self.confidence,
            landmarks: self
                .landmarks
                .map(|pts| pts.map(|(lx, ly)| (lx * factor, ly * factor))),
        }
    }
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Cosine similarity in [-1, 1]. Higher = more similar.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }

    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// One enrolled person: display name plus the reference embedding from their
/// enrollment image. The pair is built together so a name can never drift
/// onto somebody else's embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    pub reference: Embedding,
}

impl Identity {
    pub fn new(name: impl Into<String>, reference: Embedding) -> Self {
        Self {
            name: name.into(),
            reference,
        }
    }

    /// Name as written to the attendance log (uppercased).
    pub fn display_name(&self) -> String {
        self.name.trim().to_uppercase()
    }
}

/// Outcome of matching one probe embedding against the roster.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub matched: bool,
    /// Distance to the closest roster entry, if the roster was non-empty.
    pub distance: Option<f32>,
    /// Roster index of the accepted match.
    pub index: Option<usize>,
}

impl MatchResult {
    fn none(distance: Option<f32>) -> Self {
        Self {
            matched: false,
            distance,
            index: None,
        }
    }
}

/// Distance-based comparison of embeddings against a roster.
///
/// `distances` and `compare` mirror each other entry for entry. `best_match`
/// picks the minimum-distance entry and accepts it only when `compare`
/// agrees for that same index.
pub trait Matcher {
    /// Distance between two embeddings. Lower = more similar.
    fn distance(&self, reference: &Embedding, probe: &Embedding) -> f32;

    /// Whether a distance is inside the match threshold.
    fn is_match(&self, distance: f32) -> bool;

    fn distances(&self, roster: &[Identity], probe: &Embedding) -> Vec<f32> {
        roster
            .iter()
            .map(|identity| {
                if identity.reference.dim() != probe.dim() {
                    f32::INFINITY
                } else {
                    self.distance(&identity.reference, probe)
                }
            })
            .collect()
    }

    fn compare(&self, roster: &[Identity], probe: &Embedding) -> Vec<bool> {
        self.distances(roster, probe)
            .into_iter()
            .map(|d| self.is_match(d))
            .collect()
    }

    /// Closest roster entry, accepted only if it also passes the threshold.
    ///
    /// Equal distances resolve to the lowest index. NaN never wins.
    fn best_match(&self, roster: &[Identity], probe: &Embedding) -> MatchResult {
        let distances = self.distances(roster, probe);
        let matches = self.compare(roster, probe);

        let mut best: Option<(usize, f32)> = None;
        for (i, &d) in distances.iter().enumerate() {
            if d.is_nan() {
                continue;
            }
            match best {
                Some((_, best_d)) if d >= best_d => {}
                _ => best = Some((i, d)),
            }
        }

        match best {
            Some((idx, d)) if matches[idx] => MatchResult {
                matched: true,
                distance: Some(d),
                index: Some(idx),
            },
            Some((_, d)) => MatchResult::none(Some(d)),
            None => MatchResult::none(None),
        }
    }
}

/// Euclidean distance with a fixed tolerance (dlib-style face encodings).
#[derive(Debug, Clone, Copy)]
pub struct EuclideanMatcher {
    pub tolerance: f32,
}

impl EuclideanMatcher {
    pub const DEFAULT_TOLERANCE: f32 = 0.6;
}

impl Default for EuclideanMatcher {
    fn default() -> Self {
        Self {
            tolerance: Self::DEFAULT_TOLERANCE,
        }
    }
}

impl Matcher for EuclideanMatcher {
    fn distance(&self, reference: &Embedding, probe: &Embedding) -> f32 {
        reference.euclidean_distance(probe)
    }

    fn is_match(&self, distance: f32) -> bool {
        distance <= self.tolerance
    }
}

/// Cosine matcher. Distance is `1 - similarity`, so the usual argmin applies.
#[derive(Debug, Clone, Copy)]
pub struct CosineMatcher {
    pub min_similarity: f32,
}

impl CosineMatcher {
    /// ArcFace similarity threshold for a positive match.
    pub const DEFAULT_MIN_SIMILARITY: f32 = 0.40;
}

impl Default for CosineMatcher {
    fn default() -> Self {
        Self {
            min_similarity: Self::DEFAULT_MIN_SIMILARITY,
        }
    }
}

impl Matcher for CosineMatcher {
    fn distance(&self, reference: &Embedding, probe: &Embedding) -> f32 {
        1.0 - reference.similarity(probe)
    }

    fn is_match(&self, distance: f32) -> bool {
        1.0 - distance >= self.min_similarity
    }
}

/// Which matcher a configuration selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMetric {
    #[default]
    Cosine,
    Euclidean,
}

impl MatchMetric {
    /// Build the matcher, using the metric's default when no threshold is given.
    pub fn matcher(self, threshold: Option<f32>) -> Box<dyn Matcher> {
        match self {
            MatchMetric::Cosine => Box::new(CosineMatcher {
                min_similarity: threshold.unwrap_or(CosineMatcher::DEFAULT_MIN_SIMILARITY),
            }),
            MatchMetric::Euclidean => Box::new(EuclideanMatcher {
                tolerance: threshold.unwrap_or(EuclideanMatcher::DEFAULT_TOLERANCE),
            }),
        }
    }
}

impl std::str::FromStr for MatchMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cosine" => Ok(MatchMetric::Cosine),
            "euclidean" => Ok(MatchMetric::Euclidean),
            other => Err(format!("unknown match metric: {other} (need cosine or euclidean)")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(values: &[f32]) -> Embedding {
        Embedding::new(values.to_vec())
    }

    fn roster(entries: &[(&str, &[f32])]) -> Vec<Identity> {
        entries
            .iter()
            .map(|(name, values)| Identity::new(*name, emb(values)))
            .collect()
    }

    #[test]
    fn test_cosine_similarity_identical() {
        let a = emb(&[1.0, 0.0, 0.0]);
        assert!((a.similarity(&a.clone()) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        assert!(emb(&[1.0, 0.0]).similarity(&emb(&[0.0, 1.0])).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_zero_vector() {
        assert_eq!(emb(&[0.0, 0.0]).similarity(&emb(&[1.0, 0.0])), 0.0);
    }

    #[test]
    fn test_euclidean_distance() {
        let d = emb(&[0.0, 0.0]).euclidean_distance(&emb(&[3.0, 4.0]));
        assert!((d - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_display_name_uppercased() {
        let id = Identity::new("Rachit Dewangan", emb(&[1.0]));
        assert_eq!(id.display_name(), "RACHIT DEWANGAN");
    }

    #[test]
    fn test_bbox_scaled_to_full_resolution() {
        let b = BoundingBox {
            x: 10.0,
            y: 20.0,
            width: 30.0,
            height: 40.0,
            confidence: 0.9,
            landmarks: Some([(1.0, 2.0); 5]),
        };
        let full = b.scaled(4.0);
        assert_eq!((full.x, full.y, full.width, full.height), (40.0, 80.0, 120.0, 160.0));
        assert_eq!(full.confidence, 0.9);
        assert_eq!(full.landmarks.unwrap()[0], (4.0, 8.0));
    }

    #[test]
    fn test_best_match_checks_every_entry() {
        // Best match is the last entry.
        let gallery = roster(&[
            ("decoy1", &[0.0, 1.0, 0.0]),
            ("decoy2", &[0.0, 0.0, 1.0]),
            ("match", &[1.0, 0.0, 0.0]),
        ]);
        let result = CosineMatcher::default().best_match(&gallery, &emb(&[1.0, 0.0, 0.0]));
        assert!(result.matched);
        assert_eq!(result.index, Some(2));
        assert!(result.distance.unwrap().abs() < 1e-6);
    }

    #[test]
    fn test_closest_over_threshold_is_rejected() {
        let gallery = roster(&[("far", &[5.0, 5.0]), ("farther", &[9.0, 9.0])]);
        let matcher = EuclideanMatcher::default();
        let probe = emb(&[0.0, 0.0]);

        assert_eq!(matcher.compare(&gallery, &probe), vec![false, false]);
        let result = matcher.best_match(&gallery, &probe);
        assert!(!result.matched);
        assert_eq!(result.index, None);
        assert!(result.distance.unwrap() > matcher.tolerance);
    }

    #[test]
    fn test_only_minimum_distance_credited() {
        // Both are inside tolerance; only the closer one is credited.
        let gallery = roster(&[("near", &[0.3, 0.0]), ("nearest", &[0.1, 0.0])]);
        let matcher = EuclideanMatcher::default();
        let probe = emb(&[0.0, 0.0]);

        assert_eq!(matcher.compare(&gallery, &probe), vec![true, true]);
        assert_eq!(matcher.best_match(&gallery, &probe).index, Some(1));
    }

    #[test]
    fn test_tie_resolves_to_lowest_index() {
        let gallery = roster(&[("first", &[0.1, 0.0]), ("second", &[0.0, 0.1])]);
        let result = EuclideanMatcher::default().best_match(&gallery, &emb(&[0.0, 0.0]));
        assert_eq!(result.index, Some(0));
    }

    #[test]
    fn test_nan_distance_never_wins() {
        let gallery = roster(&[("broken", &[f32::NAN, 0.0]), ("ok", &[0.1, 0.0])]);
        let result = EuclideanMatcher::default().best_match(&gallery, &emb(&[0.0, 0.0]));
        assert_eq!(result.index, Some(1));
    }

    #[test]
    fn test_dimension_mismatch_never_matches() {
        let gallery = roster(&[("short", &[0.0])]);
        let matcher = EuclideanMatcher::default();
        let probe = emb(&[0.0, 0.0]);
        assert_eq!(matcher.distances(&gallery, &probe), vec![f32::INFINITY]);
        assert!(!matcher.best_match(&gallery, &probe).matched);
    }

    #[test]
    fn test_empty_roster() {
        let result = CosineMatcher::default().best_match(&[], &emb(&[1.0, 0.0]));
        assert!(!result.matched);
        assert_eq!(result.distance, None);
    }

    #[test]
    fn test_cosine_threshold_boundary() {
        let matcher = CosineMatcher { min_similarity: 0.5 };
        assert!(matcher.is_match(0.5));
        assert!(!matcher.is_match(0.51));
    }

    #[test]
    fn test_metric_builds_matcher_with_default_threshold() {
        let m = MatchMetric::Euclidean.matcher(None);
        assert!(m.is_match(0.6));
        assert!(!m.is_match(0.61));

        let m = MatchMetric::Cosine.matcher(Some(0.75));
        assert!(m.is_match(0.25));
        assert!(!m.is_match(0.5));
    }

    #[test]
    fn test_metric_from_str() {
        assert_eq!("Cosine".parse::<MatchMetric>(), Ok(MatchMetric::Cosine));
        assert_eq!("euclidean".parse::<MatchMetric>(), Ok(MatchMetric::Euclidean));
        assert!("manhattan".parse::<MatchMetric>().is_err());
    }
}
