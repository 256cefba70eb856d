//! Spatio-temporal query and cache cubes.
//!
//! A [`QueryCube`] is the region a client asks about: a closed rectangle in
//! projected X, a closed rectangle in Y, and a half-open interval in time.
//! A [`CacheCube`] additionally carries the resolution window under which a
//! stored entry may be reused.

use crate::error::{Result, TypesError};
use serde::{Deserialize, Serialize};

/// Coordinate reference system identifier (e.g. an EPSG code).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProjectionId(pub u32);

/// Whether the time axis is calendar time (epoch microseconds, UTC) or an
/// unreferenced axis (e.g. a model time step with no calendar meaning).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeType {
    Calendar,
    Unreferenced,
}

/// Requested raster output size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelResolution {
    pub w: u32,
    pub h: u32,
}

/// A plain axis-aligned 3-D box (X x Y x time), used for remainder geometry.
/// Unlike [`QueryCube`] it carries no projection/time-type tag: those are
/// fixed per fingerprint and don't need to be repeated in every sub-cube.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Cube3 {
    pub x1: f64,
    pub x2: f64,
    pub y1: f64,
    pub y2: f64,
    pub t1: i64,
    pub t2: i64,
}

impl Cube3 {
    pub fn intersects(&self, other: &Cube3) -> bool {
        self.x1 < other.x2
            && other.x1 < self.x2
            && self.y1 < other.y2
            && other.y1 < self.y2
            && self.t1 < other.t2
            && other.t1 < self.t2
    }

    pub fn contains(&self, other: &Cube3) -> bool {
        self.x1 <= other.x1
            && other.x2 <= self.x2
            && self.y1 <= other.y1
            && other.y2 <= self.y2
            && self.t1 <= other.t1
            && other.t2 <= self.t2
    }

    pub fn area_volume(&self) -> f64 {
        (self.x2 - self.x1) * (self.y2 - self.y1) * (self.t2 - self.t1) as f64
    }

    fn intersection(&self, other: &Cube3) -> Option<Cube3> {
        if !self.intersects(other) {
            return None;
        }
        Some(Cube3 {
            x1: self.x1.max(other.x1),
            x2: self.x2.min(other.x2),
            y1: self.y1.max(other.y1),
            y2: self.y2.min(other.y2),
            t1: self.t1.max(other.t1),
            t2: self.t2.min(other.t2),
        })
    }

    /// `self \ cover`, expressed as at most 6 disjoint axis-aligned boxes.
    ///
    /// Standard slab decomposition: peel off the parts of `self` that fall
    /// outside `cover`'s extent on each axis in turn, then recurse into the
    /// remaining "core" column with the next axis. At most two slabs per
    /// axis over three axes, so at most 6 pieces.
    fn subtract(&self, cover: &Cube3) -> Vec<Cube3> {
        let inter = match self.intersection(cover) {
            Some(i) => i,
            None => return vec![*self],
        };
        let mut pieces = Vec::with_capacity(6);
        let mut core = *self;

        if self.x1 < inter.x1 {
            pieces.push(Cube3 { x2: inter.x1, ..core });
            core.x1 = inter.x1;
        }
        if inter.x2 < self.x2 {
            pieces.push(Cube3 { x1: inter.x2, ..core });
            core.x2 = inter.x2;
        }
        if self.y1 < inter.y1 {
            pieces.push(Cube3 { y2: inter.y1, ..core });
            core.y1 = inter.y1;
        }
        if inter.y2 < self.y2 {
            pieces.push(Cube3 { y1: inter.y2, ..core });
            core.y2 = inter.y2;
        }
        if self.t1 < inter.t1 {
            pieces.push(Cube3 { t2: inter.t1, ..core });
            core.t1 = inter.t1;
        }
        if inter.t2 < self.t2 {
            pieces.push(Cube3 { t1: inter.t2, ..core });
        }
        pieces
    }

    /// Canonical order for remainder cubes: sort by `(x1, y1, t1)`.
    pub fn canonical_sort(cubes: &mut [Cube3]) {
        cubes.sort_by(|a, b| {
            a.x1.partial_cmp(&b.x1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.y1.partial_cmp(&b.y1).unwrap_or(std::cmp::Ordering::Equal))
                .then(a.t1.cmp(&b.t1))
        });
    }
}

/// Subtract a list of covering boxes from `q`, returning the disjoint
/// remainder in canonical `(x1, y1, t1)` order.
pub fn remainder(q: Cube3, covers: &[Cube3]) -> Vec<Cube3> {
    let mut remaining = vec![q];
    for cover in covers {
        let mut next = Vec::with_capacity(remaining.len());
        for r in &remaining {
            next.extend(r.subtract(cover));
        }
        remaining = next;
        if remaining.is_empty() {
            break;
        }
    }
    Cube3::canonical_sort(&mut remaining);
    remaining
}

/// The 3-D region a client asks about, plus optional pixel resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryCube {
    pub projection: ProjectionId,
    pub time_type: TimeType,
    pub bounds: Cube3,
    pub resolution: Option<PixelResolution>,
}

impl QueryCube {
    pub fn new(
        projection: ProjectionId,
        time_type: TimeType,
        x1: f64,
        x2: f64,
        y1: f64,
        y2: f64,
        t1: i64,
        t2: i64,
        resolution: Option<PixelResolution>,
    ) -> Result<Self> {
        if x1 > x2 {
            return Err(TypesError::InvalidXRange { x1: x1 as i64, x2: x2 as i64 });
        }
        if y1 > y2 {
            return Err(TypesError::InvalidYRange { y1: y1 as i64, y2: y2 as i64 });
        }
        if t1 >= t2 {
            return Err(TypesError::InvalidTimeRange { t1, t2 });
        }
        Ok(QueryCube {
            projection,
            time_type,
            bounds: Cube3 { x1, x2, y1, y2, t1, t2 },
            resolution,
        })
    }

    /// The raster pixel scale implied by this query's extent and
    /// resolution, or `None` for non-raster (degenerate resolution) queries.
    pub fn pixel_scale(&self) -> Option<(f64, f64)> {
        let r = self.resolution?;
        if r.w == 0 || r.h == 0 {
            return None;
        }
        Some((
            (self.bounds.x2 - self.bounds.x1) / r.w as f64,
            (self.bounds.y2 - self.bounds.y1) / r.h as f64,
        ))
    }
}

/// An inclusive scale interval, e.g. `[scale/2, scale*2]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScaleInterval {
    pub min: f64,
    pub max: f64,
}

impl ScaleInterval {
    pub fn contains(&self, v: f64) -> bool {
        self.min <= v && v <= self.max
    }
}

/// The window of pixel scales under which a stored raster entry may be
/// reused, plus the scale it was actually produced at.
///
/// The default window around a produced scale is `[scale/2, scale*2]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResolutionDescriptor {
    pub sx: ScaleInterval,
    pub sy: ScaleInterval,
    pub produced_sx: f64,
    pub produced_sy: f64,
}

impl ResolutionDescriptor {
    pub const DEFAULT_MULTIPLIER: f64 = 2.0;

    pub fn from_produced_scale(sx: f64, sy: f64) -> Result<Self> {
        Self::from_produced_scale_with_multiplier(sx, sy, Self::DEFAULT_MULTIPLIER)
    }

    pub fn from_produced_scale_with_multiplier(sx: f64, sy: f64, mult: f64) -> Result<Self> {
        if sx <= 0.0 || mult <= 1.0 {
            return Err(TypesError::EmptyScaleInterval { axis: "x" });
        }
        if sy <= 0.0 {
            return Err(TypesError::EmptyScaleInterval { axis: "y" });
        }
        Ok(ResolutionDescriptor {
            sx: ScaleInterval { min: sx / mult, max: sx * mult },
            sy: ScaleInterval { min: sy / mult, max: sy * mult },
            produced_sx: sx,
            produced_sy: sy,
        })
    }

    pub fn matches(&self, query_sx: f64, query_sy: f64) -> bool {
        self.sx.contains(query_sx) && self.sy.contains(query_sy)
    }

    /// Distance from the query scale to the entry's produced scale, used to
    /// score candidates (closer scale wins).
    pub fn scale_distance(&self, query_sx: f64, query_sy: f64) -> f64 {
        ((query_sx - self.produced_sx).powi(2) + (query_sy - self.produced_sy).powi(2)).sqrt()
    }
}

/// A query cube plus the resolution window under which a stored entry is
/// reusable. Feature-collection entries have `resolution: None` (a
/// degenerate scale interval); plot entries use the full cube
/// with `resolution: None` too since plots are never puzzled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheCube {
    pub query: QueryCube,
    pub resolution: Option<ResolutionDescriptor>,
}

impl CacheCube {
    pub fn new(query: QueryCube, resolution: Option<ResolutionDescriptor>) -> Result<Self> {
        let b = &query.bounds;
        if b.x1 == b.x2 || b.y1 == b.y2 || b.t1 == b.t2 {
            return Err(TypesError::DegenerateCube);
        }
        Ok(CacheCube { query, resolution })
    }

    /// Raster match test: cubes intersect, query scale lies in
    /// the entry's scale interval, and resolution-type matches (both
    /// carry pixel resolution, or neither does).
    pub fn matches_raster(&self, q: &QueryCube) -> bool {
        if !self.query.bounds.intersects(&q.bounds) {
            return false;
        }
        match (self.resolution, q.pixel_scale()) {
            (Some(r), Some((sx, sy))) => r.matches(sx, sy),
            (None, None) => true,
            _ => false,
        }
    }

    /// Match test for non-raster (feature/plot) entries: pure cube
    /// intersection, no scale semantics.
    pub fn matches_vector(&self, q: &QueryCube) -> bool {
        self.query.bounds.intersects(&q.bounds)
    }

    pub fn contains_cube(&self, q: &Cube3) -> bool {
        self.query.bounds.contains(q)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cube(x1: f64, x2: f64, y1: f64, y2: f64, t1: i64, t2: i64) -> Cube3 {
        Cube3 { x1, x2, y1, y2, t1, t2 }
    }

    #[test]
    fn query_cube_rejects_bad_ranges() {
        let err = QueryCube::new(ProjectionId(3857), TimeType::Calendar, 10.0, 0.0, 0.0, 1.0, 0, 1, None)
            .unwrap_err();
        assert_eq!(err, TypesError::InvalidXRange { x1: 10, x2: 0 });
    }

    #[test]
    fn remainder_of_fully_covered_query_is_empty() {
        let q = cube(0.0, 10.0, 0.0, 10.0, 0, 1);
        let r = remainder(q, &[q]);
        assert!(r.is_empty());
    }

    #[test]
    fn remainder_splits_into_disjoint_cover() {
        let q = cube(0.0, 10.0, 0.0, 10.0, 0, 1);
        let left = cube(0.0, 5.0, 0.0, 10.0, 0, 1);
        let r = remainder(q, &[left]);
        assert_eq!(r, vec![cube(5.0, 10.0, 0.0, 10.0, 0, 1)]);
    }

    #[test]
    fn remainder_is_disjoint_and_sorted() {
        let q = cube(0.0, 10.0, 0.0, 10.0, 0, 10);
        let covers = vec![cube(0.0, 4.0, 0.0, 10.0, 0, 10), cube(6.0, 10.0, 0.0, 10.0, 0, 10)];
        let r = remainder(q, &covers);
        assert_eq!(r, vec![cube(4.0, 6.0, 0.0, 10.0, 0, 10)]);

        // remainder cubes are mutually disjoint
        for i in 0..r.len() {
            for j in (i + 1)..r.len() {
                assert!(!r[i].intersects(&r[j]) || r[i] == r[j]);
            }
        }
    }

    #[test]
    fn scale_window_defaults_to_half_double() {
        let rd = ResolutionDescriptor::from_produced_scale(10.0, 20.0).unwrap();
        assert!(rd.matches(5.0, 10.0));
        assert!(rd.matches(20.0, 40.0));
        assert!(!rd.matches(4.9, 10.0));
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        /// Strategy: an arbitrary axis-aligned cube with strictly positive
        /// extent on every axis, small enough that brute-force point
        /// sampling in the properties below stays fast.
        fn arb_cube() -> impl Strategy<Value = Cube3> {
            (-100i64..100, 1i64..20, -100i64..100, 1i64..20, -100i64..100, 1i64..20).prop_map(
                |(x1, dx, y1, dy, t1, dt)| Cube3 {
                    x1: x1 as f64,
                    x2: (x1 + dx) as f64,
                    y1: y1 as f64,
                    y2: (y1 + dy) as f64,
                    t1,
                    t2: t1 + dt,
                },
            )
        }

        fn arb_covers(q: Cube3) -> impl Strategy<Value = Vec<Cube3>> {
            proptest::collection::vec(
                (0i64..20, 1i64..20, 0i64..20, 1i64..20, 0i64..20, 1i64..20).prop_map(move |(ox, dx, oy, dy, ot, dt)| {
                    let x1 = q.x1 + ox as f64;
                    let y1 = q.y1 + oy as f64;
                    let t1 = q.t1 + ot;
                    Cube3 {
                        x1,
                        x2: (x1 + dx as f64).min(q.x2),
                        y1,
                        y2: (y1 + dy as f64).min(q.y2),
                        t1,
                        t2: (t1 + dt).min(q.t2),
                    }
                }),
                0..4,
            )
        }

        fn arb_case() -> impl Strategy<Value = (Cube3, Vec<Cube3>)> {
            arb_cube().prop_flat_map(|q| arb_covers(q).prop_map(move |covers| (q, covers)))
        }

        proptest! {
            #[test]
            fn remainder_pieces_are_pairwise_disjoint((q, covers) in arb_case()) {
                let pieces = remainder(q, &covers);
                for i in 0..pieces.len() {
                    for j in (i + 1)..pieces.len() {
                        prop_assert!(!pieces[i].intersects(&pieces[j]));
                    }
                }
            }

            #[test]
            fn remainder_pieces_all_lie_within_the_query((q, covers) in arb_case()) {
                let pieces = remainder(q, &covers);
                for p in &pieces {
                    prop_assert!(q.contains(p));
                }
            }

            #[test]
            fn remainder_is_sorted_in_canonical_order((q, covers) in arb_case()) {
                let pieces = remainder(q, &covers);
                let mut sorted = pieces.clone();
                Cube3::canonical_sort(&mut sorted);
                prop_assert_eq!(pieces, sorted);
            }
        }
    }
}
