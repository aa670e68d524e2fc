//! Dense field storage for the 3D elastic grid.
//!
//! Same conventions as the 2D store, extended to a padded
//! `(nx + 2) x (ny + 2) x (nz + 2)` space with
//! `idx = (i * nyt + j) * nzt + k` (x slowest, z fastest).

/// Velocity, stress and C-PML memory arrays for a 3D elastic run.
pub struct ElasticFields3D {
    pub nxt: usize,
    pub nyt: usize,
    pub nzt: usize,

    pub vx: Vec<f32>,
    pub vy: Vec<f32>,
    pub vz: Vec<f32>,
    pub sigmaxx: Vec<f32>,
    pub sigmayy: Vec<f32>,
    pub sigmazz: Vec<f32>,
    pub sigmaxy: Vec<f32>,
    pub sigmaxz: Vec<f32>,
    pub sigmayz: Vec<f32>,

    pub mem_dvx_dx: Vec<f32>,
    pub mem_dvx_dy: Vec<f32>,
    pub mem_dvx_dz: Vec<f32>,
    pub mem_dvy_dx: Vec<f32>,
    pub mem_dvy_dy: Vec<f32>,
    pub mem_dvy_dz: Vec<f32>,
    pub mem_dvz_dx: Vec<f32>,
    pub mem_dvz_dy: Vec<f32>,
    pub mem_dvz_dz: Vec<f32>,

    pub mem_dsigmaxx_dx: Vec<f32>,
    pub mem_dsigmayy_dy: Vec<f32>,
    pub mem_dsigmazz_dz: Vec<f32>,
    pub mem_dsigmaxy_dx: Vec<f32>,
    pub mem_dsigmaxy_dy: Vec<f32>,
    pub mem_dsigmaxz_dx: Vec<f32>,
    pub mem_dsigmaxz_dz: Vec<f32>,
    pub mem_dsigmayz_dy: Vec<f32>,
    pub mem_dsigmayz_dz: Vec<f32>,
}

impl ElasticFields3D {
    pub fn new(nx: usize, ny: usize, nz: usize) -> Self {
        let nxt = nx + 2;
        let nyt = ny + 2;
        let nzt = nz + 2;
        let size = nxt * nyt * nzt;
        let zeros = || vec![0.0f32; size];
        Self {
            nxt,
            nyt,
            nzt,
            vx: zeros(),
            vy: zeros(),
            vz: zeros(),
            sigmaxx: zeros(),
            sigmayy: zeros(),
            sigmazz: zeros(),
            sigmaxy: zeros(),
            sigmaxz: zeros(),
            sigmayz: zeros(),
            mem_dvx_dx: zeros(),
            mem_dvx_dy: zeros(),
            mem_dvx_dz: zeros(),
            mem_dvy_dx: zeros(),
            mem_dvy_dy: zeros(),
            mem_dvy_dz: zeros(),
            mem_dvz_dx: zeros(),
            mem_dvz_dy: zeros(),
            mem_dvz_dz: zeros(),
            mem_dsigmaxx_dx: zeros(),
            mem_dsigmayy_dy: zeros(),
            mem_dsigmazz_dz: zeros(),
            mem_dsigmaxy_dx: zeros(),
            mem_dsigmaxy_dy: zeros(),
            mem_dsigmaxz_dx: zeros(),
            mem_dsigmaxz_dz: zeros(),
            mem_dsigmayz_dy: zeros(),
            mem_dsigmayz_dz: zeros(),
        }
    }

    #[inline(always)]
    pub fn idx(&self, i: usize, j: usize, k: usize) -> usize {
        (i * self.nyt + j) * self.nzt + k
    }

    /// Maximum velocity-vector norm over the whole grid.
    pub fn max_velocity_norm(&self) -> f32 {
        let mut max = 0.0f32;
        for i in 0..self.vx.len() {
            let n = (self.vx[i] * self.vx[i] + self.vy[i] * self.vy[i] + self.vz[i] * self.vz[i])
                .sqrt();
            max = max.max(n);
        }
        max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocation_and_indexing() {
        let f = ElasticFields3D::new(8, 6, 4);
        assert_eq!((f.nxt, f.nyt, f.nzt), (10, 8, 6));
        assert_eq!(f.vz.len(), 480);
        assert_eq!(f.idx(0, 0, 0), 0);
        assert_eq!(f.idx(0, 0, 1), 1);
        assert_eq!(f.idx(0, 1, 0), 6);
        assert_eq!(f.idx(1, 0, 0), 48);
        assert_eq!(f.idx(9, 7, 5), 479);
    }

    #[test]
    fn test_zero_initialized_norm() {
        let f = ElasticFields3D::new(4, 4, 4);
        assert_eq!(f.max_velocity_norm(), 0.0);
    }
}
