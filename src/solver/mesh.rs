use nalgebra::{Point2, Vector2};

/// Boundary condition attached to a boundary face.
///
/// The channel configuration is wall-bounded in y; the streamwise direction
/// is periodic and its face pairs are internal faces (see [`channel_mesh`]),
/// so they never appear here.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Boundary {
    Wall,
}

/// Finite-volume mesh in face-addressed SoA form.
///
/// Face normals point from owner to neighbor, outward on boundary faces.
/// `face_dx`/`face_dy` is the owner-center to neighbor-center vector with the
/// periodic wrap already folded in; on boundary faces it runs from the owner
/// center to the face center. Assembly loops use these precomputed deltas
/// instead of re-deriving distances from cell centers, so the wrap is handled
/// in exactly one place.
#[derive(Clone, Default)]
pub struct Mesh {
    pub face_owner: Vec<usize>,
    pub face_neighbor: Vec<Option<usize>>,
    pub face_boundary: Vec<Option<Boundary>>,
    pub face_nx: Vec<f64>,
    pub face_ny: Vec<f64>,
    pub face_area: Vec<f64>,
    pub face_cx: Vec<f64>,
    pub face_cy: Vec<f64>,
    pub face_dx: Vec<f64>,
    pub face_dy: Vec<f64>,
    pub face_dist: Vec<f64>,
    /// Neighbor-side linear interpolation weight: `v_f = v_P + w (v_N - v_P)`.
    pub face_w: Vec<f64>,

    pub cell_cx: Vec<f64>,
    pub cell_cy: Vec<f64>,
    pub cell_vol: Vec<f64>,
    pub cell_faces: Vec<usize>,
    pub cell_face_offsets: Vec<usize>,

    /// Boundary faces in mesh order; `face_bindex[f]` maps a face into this
    /// list so per-boundary-face value arrays stay compact.
    pub boundary_faces: Vec<usize>,
    pub face_bindex: Vec<Option<usize>>,
}

impl Mesh {
    pub fn num_cells(&self) -> usize {
        self.cell_vol.len()
    }

    pub fn num_faces(&self) -> usize {
        self.face_owner.len()
    }

    pub fn num_boundary_faces(&self) -> usize {
        self.boundary_faces.len()
    }

    pub fn total_volume(&self) -> f64 {
        self.cell_vol.iter().sum()
    }

    /// +1 if `cell` owns the face, -1 if it is the neighbor.
    #[inline]
    pub fn flux_sign(&self, face: usize, cell: usize) -> f64 {
        if self.face_owner[face] == cell {
            1.0
        } else {
            -1.0
        }
    }

    #[inline]
    pub fn face_normal(&self, face: usize) -> Vector2<f64> {
        Vector2::new(self.face_nx[face], self.face_ny[face])
    }

    #[inline]
    pub fn cell_center(&self, cell: usize) -> Point2<f64> {
        Point2::new(self.cell_cx[cell], self.cell_cy[cell])
    }

    fn push_face(
        &mut self,
        owner: usize,
        neighbor: Option<usize>,
        boundary: Option<Boundary>,
        normal: Vector2<f64>,
        area: f64,
        center: Point2<f64>,
        delta: Vector2<f64>,
    ) -> usize {
        let idx = self.face_owner.len();
        self.face_owner.push(owner);
        self.face_neighbor.push(neighbor);
        self.face_boundary.push(boundary);
        self.face_nx.push(normal.x);
        self.face_ny.push(normal.y);
        self.face_area.push(area);
        self.face_cx.push(center.x);
        self.face_cy.push(center.y);
        self.face_dx.push(delta.x);
        self.face_dy.push(delta.y);
        self.face_dist.push(delta.norm());
        let w = if neighbor.is_some() {
            let d_own = (center - Point2::new(self.cell_cx[owner], self.cell_cy[owner])).norm();
            d_own / delta.norm()
        } else {
            1.0
        };
        self.face_w.push(w);
        if boundary.is_some() {
            self.face_bindex.push(Some(self.boundary_faces.len()));
            self.boundary_faces.push(idx);
        } else {
            self.face_bindex.push(None);
        }
        idx
    }

    fn build_cell_faces(&mut self) {
        let n_cells = self.num_cells();
        let mut counts = vec![0usize; n_cells];
        for f in 0..self.num_faces() {
            counts[self.face_owner[f]] += 1;
            if let Some(n) = self.face_neighbor[f] {
                counts[n] += 1;
            }
        }
        let mut offsets = vec![0usize; n_cells + 1];
        for i in 0..n_cells {
            offsets[i + 1] = offsets[i] + counts[i];
        }
        let mut cursor = offsets.clone();
        let mut cell_faces = vec![0usize; offsets[n_cells]];
        for f in 0..self.num_faces() {
            let o = self.face_owner[f];
            cell_faces[cursor[o]] = f;
            cursor[o] += 1;
            if let Some(n) = self.face_neighbor[f] {
                cell_faces[cursor[n]] = f;
                cursor[n] += 1;
            }
        }
        self.cell_faces = cell_faces;
        self.cell_face_offsets = offsets;
    }
}

/// Structured channel mesh: `nx` x `ny` cells on `length` x `height`,
/// streamwise-periodic in x, no-slip walls at y = 0 and y = height.
///
/// The periodic coupling is expressed as ordinary internal faces joining the
/// last column back to the first, with the face delta carrying the wrapped
/// center-to-center distance of one cell pitch, so every downstream operator
/// sees a topologically closed mesh and needs no ghost exchange.
pub fn channel_mesh(nx: usize, ny: usize, length: f64, height: f64) -> Mesh {
    assert!(nx >= 2 && ny >= 2, "channel mesh needs at least 2x2 cells");
    assert!(length > 0.0 && height > 0.0);

    let dx = length / nx as f64;
    let dy = height / ny as f64;

    let mut mesh = Mesh::default();
    for j in 0..ny {
        for i in 0..nx {
            mesh.cell_cx.push((i as f64 + 0.5) * dx);
            mesh.cell_cy.push((j as f64 + 0.5) * dy);
            mesh.cell_vol.push(dx * dy);
        }
    }

    let cell = |i: usize, j: usize| j * nx + i;

    // x-normal faces; the i == nx-1 face wraps to column 0.
    for j in 0..ny {
        for i in 0..nx {
            let owner = cell(i, j);
            let neigh = cell((i + 1) % nx, j);
            let fx = (i as f64 + 1.0) * dx;
            mesh.push_face(
                owner,
                Some(neigh),
                None,
                Vector2::new(1.0, 0.0),
                dy,
                Point2::new(fx, (j as f64 + 0.5) * dy),
                Vector2::new(dx, 0.0),
            );
        }
    }

    // y-normal faces; the j == 0 and j == ny rows are the channel walls.
    for j in 0..=ny {
        for i in 0..nx {
            let fc = Point2::new((i as f64 + 0.5) * dx, j as f64 * dy);
            if j == 0 {
                mesh.push_face(
                    cell(i, 0),
                    None,
                    Some(Boundary::Wall),
                    Vector2::new(0.0, -1.0),
                    dx,
                    fc,
                    Vector2::new(0.0, -0.5 * dy),
                );
            } else if j == ny {
                mesh.push_face(
                    cell(i, ny - 1),
                    None,
                    Some(Boundary::Wall),
                    Vector2::new(0.0, 1.0),
                    dx,
                    fc,
                    Vector2::new(0.0, 0.5 * dy),
                );
            } else {
                mesh.push_face(
                    cell(i, j - 1),
                    Some(cell(i, j)),
                    None,
                    Vector2::new(0.0, 1.0),
                    dx,
                    fc,
                    Vector2::new(0.0, dy),
                );
            }
        }
    }

    mesh.build_cell_faces();
    mesh
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_mesh_counts() {
        let mesh = channel_mesh(4, 3, 2.0, 1.0);
        assert_eq!(mesh.num_cells(), 12);
        // 4 x-faces per row (wrap included) + 4 columns of 4 y-faces
        assert_eq!(mesh.num_faces(), 4 * 3 + 4 * 4);
        assert_eq!(mesh.num_boundary_faces(), 8);
        for &f in &mesh.boundary_faces {
            assert_eq!(mesh.face_boundary[f], Some(Boundary::Wall));
            assert!(mesh.face_neighbor[f].is_none());
        }
    }

    #[test]
    fn cell_face_closure() {
        // Discrete Gauss identity: the outward face-area vectors of every
        // cell sum to zero, wrap faces included.
        let mesh = channel_mesh(5, 4, 1.0, 0.5);
        for i in 0..mesh.num_cells() {
            let mut sum = Vector2::zeros();
            let start = mesh.cell_face_offsets[i];
            let end = mesh.cell_face_offsets[i + 1];
            assert_eq!(end - start, 4);
            for k in start..end {
                let f = mesh.cell_faces[k];
                sum += mesh.face_normal(f) * mesh.face_area[f] * mesh.flux_sign(f, i);
            }
            assert!(sum.norm() < 1e-12, "cell {} not closed: {:?}", i, sum);
        }
    }

    #[test]
    fn wrap_face_delta_is_one_pitch() {
        let nx = 6;
        let mesh = channel_mesh(nx, 3, 3.0, 1.0);
        let dx = 3.0 / nx as f64;
        // Wrap face of row 0 is the (nx-1)-th x-face: owner nx-1, neighbor 0.
        let f = nx - 1;
        assert_eq!(mesh.face_owner[f], nx - 1);
        assert_eq!(mesh.face_neighbor[f], Some(0));
        assert!((mesh.face_dx[f] - dx).abs() < 1e-12);
        assert!((mesh.face_dist[f] - dx).abs() < 1e-12);
        assert!((mesh.face_w[f] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn total_volume_matches_domain() {
        let mesh = channel_mesh(8, 5, 2.0, 0.7);
        assert!((mesh.total_volume() - 2.0 * 0.7).abs() < 1e-12);
    }
}
