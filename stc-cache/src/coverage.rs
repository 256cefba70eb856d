//! The coverage-query algorithm: given a query cube and a
//! fingerprint's candidate entries, return an exact hit, a partial hit
//! (contributing entries plus remainder), or a miss.

use stc_types::{CacheCube, Cube3, EntryId, QueryCube, ResultType};

/// Anything that can be scored and subtracted against a query cube: a
/// node-local `Entry` or an index-level `NodeCacheRef`, both of which
/// carry a `CacheCube`.
pub trait Located {
    fn cache_cube(&self) -> &CacheCube;
    fn size_bytes(&self) -> u64;
    fn entry_id(&self) -> EntryId;
}

#[derive(Debug, Clone, PartialEq)]
pub enum Coverage<T> {
    /// A single entry whose cube contains Q and whose scale matches.
    Hit(T),
    /// Entries ordered by decreasing score, plus the uncovered remainder.
    Partial { contributing: Vec<T>, remainder: Vec<Cube3> },
    Miss,
}

fn matches(cc: &CacheCube, q: &QueryCube, result_type: ResultType) -> bool {
    match result_type {
        ResultType::Raster => cc.matches_raster(q),
        _ => cc.matches_vector(q),
    }
}

/// Score a candidate against the query: higher is better. Prefers large
/// overlap with Q and scale close to the query scale; ties favor the more
/// specific (smaller) cube.
fn score(cc: &CacheCube, q: &QueryCube, result_type: ResultType) -> f64 {
    let overlap = overlap_volume(&cc.query.bounds, &q.bounds);
    let specificity = 1.0 / (1.0 + cc.query.bounds.area_volume().max(1.0));
    let scale_term = match (result_type, cc.resolution, q.pixel_scale()) {
        (ResultType::Raster, Some(r), Some((sx, sy))) => {
            1.0 / (1.0 + r.scale_distance(sx, sy))
        }
        _ => 1.0,
    };
    overlap * 1000.0 + specificity + scale_term
}

fn overlap_volume(a: &Cube3, b: &Cube3) -> f64 {
    let ox = (a.x2.min(b.x2) - a.x1.max(b.x1)).max(0.0);
    let oy = (a.y2.min(b.y2) - a.y1.max(b.y1)).max(0.0);
    let ot = (a.t2.min(b.t2) - a.t1.max(b.t1)).max(0) as f64;
    ox * oy * ot
}

/// Run the coverage query over a snapshot of a fingerprint's
/// candidates. Greedy: sort by descending score, take a candidate if it
/// covers any currently-uncovered sub-cube, stop when the remainder is
/// empty or no candidate contributes new coverage.
pub fn coverage_query<T: Located + Clone>(
    candidates: &[T],
    q: &QueryCube,
    result_type: ResultType,
) -> Coverage<T> {
    let mut scored: Vec<(f64, &T)> = candidates
        .iter()
        .filter(|c| matches(c.cache_cube(), q, result_type))
        .map(|c| (score(c.cache_cube(), q, result_type), c))
        .collect();

    if scored.is_empty() {
        return Coverage::Miss;
    }

    // Exact hit: a single candidate whose cube contains Q outright.
    if let Some((_, exact)) = scored
        .iter()
        .find(|(_, c)| c.cache_cube().query.bounds.contains(&q.bounds))
    {
        return Coverage::Hit((*exact).clone());
    }

    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

    let mut remaining = vec![q.bounds];
    let mut contributing = Vec::new();

    for (_, candidate) in scored {
        if remaining.is_empty() {
            break;
        }
        let cc = candidate.cache_cube();
        let new_remaining = subtract_all(&remaining, cc.query.bounds);
        let new_volume: f64 = new_remaining.iter().map(Cube3::area_volume).sum();
        let old_volume: f64 = remaining.iter().map(Cube3::area_volume).sum();
        if new_volume < old_volume {
            remaining = new_remaining;
            contributing.push(candidate.clone());
        }
    }

    if contributing.is_empty() {
        return Coverage::Miss;
    }

    Coverage::Partial { contributing, remainder: remaining }
}

fn subtract_all(remaining: &[Cube3], cover: Cube3) -> Vec<Cube3> {
    let mut next = Vec::new();
    for r in remaining {
        next.extend(stc_types::cube::remainder(*r, &[cover]));
    }
    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use stc_types::{CacheCube, PixelResolution, ProjectionId, QueryCube, TimeType};

    #[derive(Debug, Clone, PartialEq)]
    struct TestEntry {
        id: EntryId,
        cube: CacheCube,
        size: u64,
    }

    impl Located for TestEntry {
        fn cache_cube(&self) -> &CacheCube {
            &self.cube
        }
        fn size_bytes(&self) -> u64 {
            self.size
        }
        fn entry_id(&self) -> EntryId {
            self.id
        }
    }

    fn qc(x1: f64, x2: f64) -> QueryCube {
        QueryCube::new(ProjectionId(3857), TimeType::Calendar, x1, x2, 0.0, 10.0, 0, 1, None).unwrap()
    }

    fn entry(x1: f64, x2: f64) -> TestEntry {
        TestEntry { id: EntryId(0), cube: CacheCube::new(qc(x1, x2), None).unwrap(), size: 100 }
    }

    #[test]
    fn exact_hit_when_single_entry_contains_query() {
        let candidates = vec![entry(0.0, 20.0)];
        let q = qc(5.0, 10.0);
        match coverage_query(&candidates, &q, ResultType::Polygons) {
            Coverage::Hit(e) => assert_eq!(e, candidates[0]),
            other => panic!("expected hit, got {other:?}"),
        }
    }

    #[test]
    fn partial_hit_combines_two_entries_with_empty_remainder() {
        let candidates = vec![entry(0.0, 5.0), entry(5.0, 10.0)];
        let q = qc(0.0, 10.0);
        match coverage_query(&candidates, &q, ResultType::Polygons) {
            Coverage::Partial { contributing, remainder } => {
                assert_eq!(contributing.len(), 2);
                assert!(remainder.is_empty());
            }
            other => panic!("expected partial, got {other:?}"),
        }
    }

    #[test]
    fn partial_hit_leaves_remainder_for_uncovered_region() {
        let candidates = vec![entry(0.0, 8.0)];
        let q = qc(0.0, 10.0);
        match coverage_query(&candidates, &q, ResultType::Polygons) {
            Coverage::Partial { contributing, remainder } => {
                assert_eq!(contributing.len(), 1);
                assert_eq!(remainder.len(), 1);
                assert_eq!(remainder[0].x1, 8.0);
                assert_eq!(remainder[0].x2, 10.0);
            }
            other => panic!("expected partial, got {other:?}"),
        }
    }

    #[test]
    fn miss_when_nothing_overlaps() {
        let candidates = vec![entry(100.0, 120.0)];
        let q = qc(0.0, 10.0);
        assert_eq!(coverage_query(&candidates, &q, ResultType::Polygons), Coverage::Miss);
    }

    #[test]
    fn raster_requires_scale_match() {
        let q = QueryCube::new(
            ProjectionId(3857),
            TimeType::Calendar,
            0.0,
            10.0,
            0.0,
            10.0,
            0,
            1,
            Some(PixelResolution { w: 100, h: 100 }),
        )
        .unwrap();
        let far_scale_cube = CacheCube::new(
            qc(0.0, 10.0),
            Some(stc_types::ResolutionDescriptor::from_produced_scale(50.0, 50.0).unwrap()),
        )
        .unwrap();
        let candidates = vec![TestEntry { id: EntryId(0), cube: far_scale_cube, size: 1 }];
        assert_eq!(coverage_query(&candidates, &q, ResultType::Raster), Coverage::Miss);
    }
}
