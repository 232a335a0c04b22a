//! Domain patches fed to the local tree computation.
//!
//! A patch is a connected piece of the domain with its own dense local
//! numbering. Patches of one decomposition overlap on shared vertices;
//! every vertex knows how many patches contain it (its multiplicity), which
//! is what the gather stages count down to decide when it is complete.

use hashbrown::HashMap;
use num_traits::ToPrimitive;
use serde::{Deserialize, Serialize};

use crate::topo_error::TopoError;
use crate::{FunctionType, GlobalIndex, LocalIndex};

/// Read access to one patch of the domain.
pub trait PatchDomain {
    /// Number of vertices in the patch.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn global_index(&self, local: LocalIndex) -> GlobalIndex;

    fn value(&self, local: LocalIndex) -> FunctionType;

    /// Number of patches sharing the vertex; 1 for interior vertices.
    fn multiplicity(&self, local: LocalIndex) -> u32;

    /// Replace the contents of `out` with the neighbors of `local`.
    fn neighbors(&self, local: LocalIndex, out: &mut Vec<LocalIndex>);
}

/// Grid adjacency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Connectivity {
    /// Axis-aligned neighbors (4 in 2-D, 6 in 3-D).
    #[default]
    Face,
    /// Every vertex of the surrounding cube (8 in 2-D, 26 in 3-D).
    Full,
}

impl Connectivity {
    fn offsets(self) -> Vec<[i64; 3]> {
        let mut out = Vec::new();
        for dz in -1..=1i64 {
            for dy in -1..=1i64 {
                for dx in -1..=1i64 {
                    let nonzero = [dx, dy, dz].iter().filter(|&&d| d != 0).count();
                    let keep = match self {
                        Connectivity::Face => nonzero == 1,
                        Connectivity::Full => nonzero > 0,
                    };
                    if keep {
                        out.push([dx, dy, dz]);
                    }
                }
            }
        }
        out
    }
}

/// Axis-aligned box of a regular grid with up to three dimensions.
#[derive(Debug, Clone)]
pub struct GridPatch {
    dims: [u32; 3],
    origin: [u32; 3],
    extent: [u32; 3],
    values: Vec<FunctionType>,
    /// Global coordinates per axis that lie on a plane shared with a
    /// neighboring patch.
    shared: [Vec<u32>; 3],
    offsets: Vec<[i64; 3]>,
}

impl GridPatch {
    /// The whole grid as a single patch. `field` is x-fastest.
    pub fn whole<T: ToPrimitive>(
        dims: [u32; 3],
        field: &[T],
        connectivity: Connectivity,
    ) -> Result<Self, TopoError> {
        GridDecomposition::new(dims, [1, 1, 1])?
            .patches(field, connectivity)?
            .pop()
            .ok_or_else(|| TopoError::InvalidPatch("empty grid".into()))
    }

    pub fn origin(&self) -> [u32; 3] {
        self.origin
    }

    pub fn extent(&self) -> [u32; 3] {
        self.extent
    }

    fn coords(&self, local: LocalIndex) -> [u32; 3] {
        let [ex, ey, _] = self.extent;
        let l = local;
        [l % ex, (l / ex) % ey, l / (ex * ey)]
    }

    fn local_of(&self, c: [u32; 3]) -> LocalIndex {
        let [ex, ey, _] = self.extent;
        c[0] + ex * (c[1] + ey * c[2])
    }
}

impl PatchDomain for GridPatch {
    fn len(&self) -> usize {
        self.values.len()
    }

    fn global_index(&self, local: LocalIndex) -> GlobalIndex {
        let c = self.coords(local);
        let [dx, dy, _] = self.dims.map(u64::from);
        let g = |a: usize| u64::from(self.origin[a] + c[a]);
        g(0) + dx * (g(1) + dy * g(2))
    }

    fn value(&self, local: LocalIndex) -> FunctionType {
        self.values[local as usize]
    }

    fn multiplicity(&self, local: LocalIndex) -> u32 {
        let c = self.coords(local);
        (0..3)
            .map(|a| {
                if self.shared[a].contains(&(self.origin[a] + c[a])) {
                    2
                } else {
                    1
                }
            })
            .product()
    }

    fn neighbors(&self, local: LocalIndex, out: &mut Vec<LocalIndex>) {
        out.clear();
        let c = self.coords(local);
        for off in &self.offsets {
            let mut n = [0u32; 3];
            let mut inside = true;
            for a in 0..3 {
                let v = i64::from(c[a]) + off[a];
                if v < 0 || v >= i64::from(self.extent[a]) {
                    inside = false;
                    break;
                }
                n[a] = v as u32;
            }
            if inside {
                out.push(self.local_of(n));
            }
        }
    }
}

/// Splits a grid into blocks that overlap by one vertex layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridDecomposition {
    dims: [u32; 3],
    /// Per axis the block boundaries `p_0 = 0 < ... < p_b = n - 1`.
    splits: [Vec<u32>; 3],
}

impl GridDecomposition {
    pub fn new(dims: [u32; 3], blocks: [u32; 3]) -> Result<Self, TopoError> {
        let mut splits: [Vec<u32>; 3] = Default::default();
        for a in 0..3 {
            let (n, b) = (dims[a], blocks[a]);
            if n == 0 || b == 0 {
                return Err(TopoError::InvalidPatch(format!(
                    "axis {a}: {n} vertices in {b} blocks"
                )));
            }
            if b > 1 && n - 1 < b {
                return Err(TopoError::InvalidPatch(format!(
                    "axis {a}: {n} vertices cannot form {b} overlapping blocks"
                )));
            }
            splits[a] = (0..=b)
                .map(|k| (f64::from(k) * f64::from(n - 1) / f64::from(b)).round() as u32)
                .collect();
        }
        Ok(Self { dims, splits })
    }

    pub fn dims(&self) -> [u32; 3] {
        self.dims
    }

    pub fn block_count(&self) -> usize {
        self.splits.iter().map(|s| s.len() - 1).product()
    }

    /// Cut `field` (x-fastest, one value per grid vertex) into patches,
    /// x-blocks varying fastest.
    pub fn patches<T: ToPrimitive>(
        &self,
        field: &[T],
        connectivity: Connectivity,
    ) -> Result<Vec<GridPatch>, TopoError> {
        let total: usize = self.dims.iter().map(|&d| d as usize).product();
        if field.len() != total {
            return Err(TopoError::InvalidPatch(format!(
                "field has {} values, grid {:?} needs {total}",
                field.len(),
                self.dims
            )));
        }
        let shared: [Vec<u32>; 3] = std::array::from_fn(|a| {
            let s = &self.splits[a];
            s[1..s.len() - 1].to_vec()
        });
        let offsets = connectivity.offsets();
        let [nx, ny, _] = self.dims.map(|d| d as usize);
        let counts = self.splits.clone().map(|s| s.len() - 1);

        let mut out = Vec::with_capacity(self.block_count());
        for bz in 0..counts[2] {
            for by in 0..counts[1] {
                for bx in 0..counts[0] {
                    let b = [bx, by, bz];
                    let origin: [u32; 3] = std::array::from_fn(|a| self.splits[a][b[a]]);
                    // with a single vertex on an axis the block is that vertex
                    let extent: [u32; 3] =
                        std::array::from_fn(|a| self.splits[a][b[a] + 1] - origin[a] + 1);
                    let mut values = Vec::with_capacity(extent.iter().map(|&e| e as usize).product());
                    for z in origin[2]..origin[2] + extent[2] {
                        for y in origin[1]..origin[1] + extent[1] {
                            for x in origin[0]..origin[0] + extent[0] {
                                let g = x as usize + nx * (y as usize + ny * z as usize);
                                let v = field[g].to_f32().ok_or_else(|| {
                                    TopoError::InvalidPatch(format!(
                                        "value at {g} is not representable"
                                    ))
                                })?;
                                values.push(v);
                            }
                        }
                    }
                    out.push(GridPatch {
                        dims: self.dims,
                        origin,
                        extent,
                        values,
                        shared: shared.clone(),
                        offsets: offsets.clone(),
                    });
                }
            }
        }
        log::debug!("decomposed grid {:?} into {} patches", self.dims, out.len());
        Ok(out)
    }
}

/// Explicit vertex and edge lists, for point clouds and meshes.
#[derive(Debug, Clone, Default)]
pub struct MeshPatch {
    ids: Vec<GlobalIndex>,
    values: Vec<FunctionType>,
    multiplicity: Vec<u32>,
    adjacency: Vec<Vec<LocalIndex>>,
}

impl MeshPatch {
    /// Build from `(id, value, multiplicity)` triples and undirected edges
    /// given by global id.
    pub fn from_edges(
        vertices: Vec<(GlobalIndex, FunctionType, u32)>,
        edges: &[(GlobalIndex, GlobalIndex)],
    ) -> Result<Self, TopoError> {
        let mut local: HashMap<GlobalIndex, LocalIndex> = HashMap::with_capacity(vertices.len());
        let mut patch = MeshPatch::default();
        for (i, (id, value, m)) in vertices.into_iter().enumerate() {
            if local.insert(id, i as LocalIndex).is_some() {
                return Err(TopoError::DuplicateVertex(id));
            }
            if m == 0 {
                return Err(TopoError::InvalidPatch(format!("vertex {id} has multiplicity 0")));
            }
            patch.ids.push(id);
            patch.values.push(value);
            patch.multiplicity.push(m);
            patch.adjacency.push(Vec::new());
        }
        for &(a, b) in edges {
            if a == b {
                return Err(TopoError::SelfLoop(a));
            }
            let la = *local.get(&a).ok_or(TopoError::UnknownVertex(a))?;
            let lb = *local.get(&b).ok_or(TopoError::UnknownVertex(b))?;
            if !patch.adjacency[la as usize].contains(&lb) {
                patch.adjacency[la as usize].push(lb);
                patch.adjacency[lb as usize].push(la);
            }
        }
        Ok(patch)
    }
}

impl PatchDomain for MeshPatch {
    fn len(&self) -> usize {
        self.ids.len()
    }

    fn global_index(&self, local: LocalIndex) -> GlobalIndex {
        self.ids[local as usize]
    }

    fn value(&self, local: LocalIndex) -> FunctionType {
        self.values[local as usize]
    }

    fn multiplicity(&self, local: LocalIndex) -> u32 {
        self.multiplicity[local as usize]
    }

    fn neighbors(&self, local: LocalIndex, out: &mut Vec<LocalIndex>) {
        out.clear();
        out.extend_from_slice(&self.adjacency[local as usize]);
    }
}
