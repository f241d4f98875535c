//! Procedural demo scenes and CPU ray queries.
//!
//! Scenes are built in code (file loading stays outside the core); they own
//! flat triangle soup, a material table, a pinhole camera and a BVH for CPU
//! queries. GPU integrators read the same soup through the packing accessors
//! and let the device build its own acceleration structure.

use crate::accel::{build_bvh, ray_triangle, Aabb, Bvh};
use crate::util::{Vec2, Vec3, Vec4};

/// Pinhole camera. Aspect ratio is a call-site parameter so one scene can
/// render at any output size.
#[derive(Debug, Clone)]
pub struct Camera {
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    /// Vertical field of view, degrees.
    pub fov_y: f32,
}

impl Camera {
    fn basis(&self) -> (Vec3, Vec3, Vec3) {
        let forward = (self.target - self.position).normalize();
        let right = forward.cross(self.up).normalize();
        let up = right.cross(forward);
        (forward, right, up)
    }

    /// Primary ray through film coordinates `uv` in [0,1]^2, (0,0) at the
    /// top-left pixel corner.
    pub fn ray(&self, uv: Vec2, aspect: f32) -> (Vec3, Vec3) {
        let (forward, right, up) = self.basis();
        let tan_half = (self.fov_y.to_radians() * 0.5).tan();
        let px = (2.0 * uv.x - 1.0) * tan_half * aspect;
        let py = (1.0 - 2.0 * uv.y) * tan_half;
        let dir = (forward + right * px + up * py).normalize();
        (self.position, dir)
    }

    /// Projects a world point to normalized device coordinates in [-1,1]^2.
    /// `None` when the point lies behind the camera or outside the frustum.
    pub fn project(&self, point: Vec3, aspect: f32) -> Option<Vec2> {
        let (forward, right, up) = self.basis();
        let v = point - self.position;
        let z = v.dot(forward);
        if z <= 1e-6 {
            return None;
        }
        let tan_half = (self.fov_y.to_radians() * 0.5).tan();
        let ndc = Vec2::new(
            v.dot(right) / (z * tan_half * aspect),
            v.dot(up) / (z * tan_half),
        );
        (ndc.x.abs() <= 1.0 && ndc.y.abs() <= 1.0).then_some(ndc)
    }
}

/// Flat-shaded triangle; the face normal is cached at build time.
#[derive(Debug, Clone, Copy)]
pub struct Triangle {
    pub v0: Vec3,
    pub v1: Vec3,
    pub v2: Vec3,
    pub normal: Vec3,
    pub material: u32,
}

impl Triangle {
    pub fn area(&self) -> f32 {
        0.5 * (self.v1 - self.v0).cross(self.v2 - self.v0).length()
    }
}

/// Lambertian material with optional emission.
#[derive(Debug, Clone, Copy)]
pub struct Material {
    pub albedo: Vec3,
    pub emission: Vec3,
}

impl Material {
    pub fn diffuse(albedo: Vec3) -> Self {
        Self {
            albedo,
            emission: Vec3::ZERO,
        }
    }

    pub fn emissive(emission: Vec3) -> Self {
        Self {
            albedo: Vec3::ZERO,
            emission,
        }
    }

    #[inline]
    pub fn is_emitter(&self) -> bool {
        self.emission.max_element() > 0.0
    }
}

/// Closest-hit query result. `normal` faces the incoming ray.
#[derive(Debug, Clone, Copy)]
pub struct Hit {
    pub t: f32,
    pub point: Vec3,
    pub normal: Vec3,
    pub material: u32,
    pub triangle: u32,
}

/// A sampled point on an area emitter.
#[derive(Debug, Clone, Copy)]
pub struct EmitterSample {
    pub position: Vec3,
    pub normal: Vec3,
    pub emission: Vec3,
    /// Probability density over emitter surface area.
    pub pdf_area: f32,
}

/// Immutable render scene; integrators share it behind an `Arc`.
pub struct Scene {
    pub name: &'static str,
    camera: Camera,
    triangles: Vec<Triangle>,
    materials: Vec<Material>,
    emitters: Vec<u32>,
    total_emitter_area: f32,
    bvh: Bvh,
}

impl Scene {
    fn build(
        name: &'static str,
        camera: Camera,
        triangles: Vec<Triangle>,
        materials: Vec<Material>,
    ) -> Self {
        let bounds: Vec<Aabb> = triangles
            .iter()
            .map(|t| Aabb::from_triangle(t.v0, t.v1, t.v2))
            .collect();
        let bvh = build_bvh(&bounds);
        let emitters: Vec<u32> = triangles
            .iter()
            .enumerate()
            .filter(|(_, t)| materials[t.material as usize].is_emitter())
            .map(|(i, _)| i as u32)
            .collect();
        let total_emitter_area = emitters
            .iter()
            .map(|&i| triangles[i as usize].area())
            .sum();
        Self {
            name,
            camera,
            triangles,
            materials,
            emitters,
            total_emitter_area,
            bvh,
        }
    }

    /// Classic closed box with a ceiling light and two blocks. Interior
    /// spans x,z in [-1,1] and y in [0,2].
    pub fn cornell() -> Self {
        let white = Material::diffuse(Vec3::splat(0.73));
        let red = Material::diffuse(Vec3::new(0.65, 0.05, 0.05));
        let green = Material::diffuse(Vec3::new(0.12, 0.45, 0.15));
        let lamp = Material::emissive(Vec3::splat(15.0));
        let materials = vec![white, red, green, lamp];

        let mut soup = SoupBuilder::default();
        // Walls, wound to face the interior.
        soup.quad(
            Vec3::new(-1.0, 0.0, 1.0),
            Vec3::new(1.0, 0.0, 1.0),
            Vec3::new(1.0, 0.0, -1.0),
            Vec3::new(-1.0, 0.0, -1.0),
            0,
        ); // floor
        soup.quad(
            Vec3::new(-1.0, 2.0, -1.0),
            Vec3::new(1.0, 2.0, -1.0),
            Vec3::new(1.0, 2.0, 1.0),
            Vec3::new(-1.0, 2.0, 1.0),
            0,
        ); // ceiling
        soup.quad(
            Vec3::new(-1.0, 0.0, -1.0),
            Vec3::new(1.0, 0.0, -1.0),
            Vec3::new(1.0, 2.0, -1.0),
            Vec3::new(-1.0, 2.0, -1.0),
            0,
        ); // back
        soup.quad(
            Vec3::new(-1.0, 0.0, 1.0),
            Vec3::new(-1.0, 0.0, -1.0),
            Vec3::new(-1.0, 2.0, -1.0),
            Vec3::new(-1.0, 2.0, 1.0),
            1,
        ); // left, red
        soup.quad(
            Vec3::new(1.0, 0.0, -1.0),
            Vec3::new(1.0, 0.0, 1.0),
            Vec3::new(1.0, 2.0, 1.0),
            Vec3::new(1.0, 2.0, -1.0),
            2,
        ); // right, green
        soup.quad(
            Vec3::new(-0.3, 1.998, -0.3),
            Vec3::new(0.3, 1.998, -0.3),
            Vec3::new(0.3, 1.998, 0.3),
            Vec3::new(-0.3, 1.998, 0.3),
            3,
        ); // lamp, just below the ceiling
        soup.boxx(
            Vec3::new(-0.72, 0.0, -0.62),
            Vec3::new(-0.17, 1.2, -0.07),
            0,
        ); // tall block
        soup.boxx(Vec3::new(0.15, 0.0, 0.05), Vec3::new(0.70, 0.6, 0.60), 0); // short block

        let camera = Camera {
            position: Vec3::new(0.0, 1.0, 3.4),
            target: Vec3::new(0.0, 1.0, 0.0),
            up: Vec3::Y,
            fov_y: 40.0,
        };
        Self::build("cornell", camera, soup.triangles, materials)
    }

    /// Open-air scene for the sky integrators: a large ground plane and a
    /// few blocks near the origin, camera looking at the horizon.
    pub fn sky() -> Self {
        let ground = Material::diffuse(Vec3::splat(0.3));
        let slate = Material::diffuse(Vec3::new(0.25, 0.3, 0.4));
        let sand = Material::diffuse(Vec3::new(0.7, 0.6, 0.4));
        let materials = vec![ground, slate, sand];

        let mut soup = SoupBuilder::default();
        soup.quad(
            Vec3::new(-200.0, 0.0, 200.0),
            Vec3::new(200.0, 0.0, 200.0),
            Vec3::new(200.0, 0.0, -200.0),
            Vec3::new(-200.0, 0.0, -200.0),
            0,
        );
        soup.boxx(Vec3::new(-3.0, 0.0, -2.0), Vec3::new(-1.5, 2.5, -0.5), 1);
        soup.boxx(Vec3::new(0.5, 0.0, -1.5), Vec3::new(2.0, 1.2, 0.0), 2);
        soup.boxx(Vec3::new(-0.5, 0.0, 1.0), Vec3::new(0.5, 0.7, 2.0), 1);

        let camera = Camera {
            position: Vec3::new(0.0, 1.6, 7.5),
            target: Vec3::new(0.0, 1.2, 0.0),
            up: Vec3::Y,
            fov_y: 60.0,
        };
        Self::build("sky", camera, soup.triangles, materials)
    }

    #[inline]
    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    #[inline]
    pub fn triangles(&self) -> &[Triangle] {
        &self.triangles
    }

    #[inline]
    pub fn materials(&self) -> &[Material] {
        &self.materials
    }

    #[inline]
    pub fn triangle_count(&self) -> u32 {
        self.triangles.len() as u32
    }

    #[inline]
    pub fn emitters(&self) -> &[u32] {
        &self.emitters
    }

    /// Closest hit along `dir` from `origin`, within `t_max`.
    pub fn intersect(&self, origin: Vec3, dir: Vec3, t_max: f32) -> Option<Hit> {
        let (t, prim) = self.bvh.intersect(origin, dir, t_max, |prim, t_max| {
            let tri = &self.triangles[prim as usize];
            ray_triangle(origin, dir, tri.v0, tri.v1, tri.v2, t_max).map(|(t, _uv)| t)
        })?;
        let tri = &self.triangles[prim as usize];
        let normal = if tri.normal.dot(dir) > 0.0 {
            -tri.normal
        } else {
            tri.normal
        };
        Some(Hit {
            t,
            point: origin + dir * t,
            normal,
            material: tri.material,
            triangle: prim,
        })
    }

    /// Any geometry within `t_max` along the segment?
    pub fn occluded(&self, origin: Vec3, dir: Vec3, t_max: f32) -> bool {
        self.bvh.occluded(origin, dir, t_max, |prim, t_max| {
            let tri = &self.triangles[prim as usize];
            ray_triangle(origin, dir, tri.v0, tri.v1, tri.v2, t_max).map(|(t, _uv)| t)
        })
    }

    /// Uniform point on the scene's emitting surfaces from three uniform
    /// numbers. `None` when the scene has no emitters.
    pub fn sample_emitter(&self, u: Vec3) -> Option<EmitterSample> {
        if self.emitters.is_empty() || self.total_emitter_area <= 0.0 {
            return None;
        }
        let pick = ((u.x * self.emitters.len() as f32) as usize).min(self.emitters.len() - 1);
        let tri = &self.triangles[self.emitters[pick] as usize];

        // Square-root warp for uniform barycentrics.
        let su = u.y.sqrt();
        let b0 = 1.0 - su;
        let b1 = u.z * su;
        let position = tri.v0 * b0 + tri.v1 * b1 + tri.v2 * (1.0 - b0 - b1);

        let area = tri.area();
        Some(EmitterSample {
            position,
            normal: tri.normal,
            emission: self.materials[tri.material as usize].emission,
            pdf_area: 1.0 / (self.emitters.len() as f32 * area),
        })
    }

    /// Triangle positions as vec4-stride soup (w unused), three vertices per
    /// triangle, for device-side acceleration structure builds.
    pub fn packed_positions(&self) -> Vec<[f32; 4]> {
        let mut out = Vec::with_capacity(self.triangles.len() * 3);
        for tri in &self.triangles {
            for v in [tri.v0, tri.v1, tri.v2] {
                out.push([v.x, v.y, v.z, 0.0]);
            }
        }
        out
    }

    /// Trivial index list matching [`Scene::packed_positions`].
    pub fn packed_indices(&self) -> Vec<u32> {
        (0..self.triangles.len() as u32 * 3).collect()
    }

    /// Per-triangle shading constants (albedo, emission) for kernel-side
    /// lookup by primitive index.
    pub fn packed_shading(&self) -> Vec<[Vec4; 2]> {
        self.triangles
            .iter()
            .map(|t| {
                let m = &self.materials[t.material as usize];
                [m.albedo.extend(0.0), m.emission.extend(0.0)]
            })
            .collect()
    }
}

/// Accumulates quads and boxes into triangle soup.
#[derive(Default)]
struct SoupBuilder {
    triangles: Vec<Triangle>,
}

impl SoupBuilder {
    fn tri(&mut self, v0: Vec3, v1: Vec3, v2: Vec3, material: u32) {
        let normal = (v1 - v0).cross(v2 - v0).normalize_or_zero();
        self.triangles.push(Triangle {
            v0,
            v1,
            v2,
            normal,
            material,
        });
    }

    fn quad(&mut self, a: Vec3, b: Vec3, c: Vec3, d: Vec3, material: u32) {
        self.tri(a, b, c, material);
        self.tri(a, c, d, material);
    }

    /// Axis-aligned box with outward faces.
    fn boxx(&mut self, min: Vec3, max: Vec3, material: u32) {
        let p = |x: f32, y: f32, z: f32| Vec3::new(x, y, z);
        let (a, b) = (min, max);
        // -y, +y
        self.quad(p(a.x, a.y, a.z), p(b.x, a.y, a.z), p(b.x, a.y, b.z), p(a.x, a.y, b.z), material);
        self.quad(p(a.x, b.y, b.z), p(b.x, b.y, b.z), p(b.x, b.y, a.z), p(a.x, b.y, a.z), material);
        // -z, +z
        self.quad(p(b.x, a.y, a.z), p(a.x, a.y, a.z), p(a.x, b.y, a.z), p(b.x, b.y, a.z), material);
        self.quad(p(a.x, a.y, b.z), p(b.x, a.y, b.z), p(b.x, b.y, b.z), p(a.x, b.y, b.z), material);
        // -x, +x
        self.quad(p(a.x, a.y, a.z), p(a.x, a.y, b.z), p(a.x, b.y, b.z), p(a.x, b.y, a.z), material);
        self.quad(p(b.x, a.y, b.z), p(b.x, a.y, a.z), p(b.x, b.y, a.z), p(b.x, b.y, b.z), material);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cornell_geometry() {
        let scene = Scene::cornell();
        // 6 quads (12 tris) + 2 boxes (24 tris)
        assert_eq!(scene.triangle_count(), 36);
        assert_eq!(scene.emitters().len(), 2);

        // Looking straight down the z axis from the camera hits the back
        // wall or a block, never escapes the box.
        let (origin, dir) = (Vec3::new(0.0, 1.0, 3.4), -Vec3::Z);
        let hit = scene.intersect(origin, dir, f32::MAX).expect("closed box");
        assert!(hit.t > 0.0 && hit.t <= 4.4 + 1e-4);
        // The hit normal faces the ray.
        assert!(hit.normal.dot(dir) < 0.0);
    }

    #[test]
    fn test_occlusion_between_walls() {
        let scene = Scene::cornell();
        // Tall block stands between the left wall and the box center.
        let from = Vec3::new(-0.95, 0.6, -0.35);
        let to = Vec3::new(0.9, 0.6, -0.35);
        let dir = (to - from).normalize();
        assert!(scene.occluded(from, dir, (to - from).length()));
        // Straight up from the middle of the floor to just below the lamp is
        // clear.
        assert!(!scene.occluded(
            Vec3::new(0.0, 0.01, 0.0),
            Vec3::Y,
            1.9
        ));
    }

    #[test]
    fn test_emitter_sampling_lands_on_lamp() {
        let scene = Scene::cornell();
        for i in 0..32 {
            let u = Vec3::new(
                (i as f32 + 0.5) / 32.0,
                ((i * 7) % 32) as f32 / 32.0,
                ((i * 13) % 32) as f32 / 32.0,
            );
            let s = scene.sample_emitter(u).expect("cornell has a lamp");
            assert!((s.position.y - 1.998).abs() < 1e-4);
            assert!(s.position.x.abs() <= 0.3 + 1e-4);
            assert!(s.position.z.abs() <= 0.3 + 1e-4);
            assert!(s.emission.max_element() > 0.0);
            assert!(s.pdf_area > 0.0);
        }
    }

    #[test]
    fn test_camera_project_roundtrip() {
        let scene = Scene::cornell();
        let cam = scene.camera();
        let aspect = 16.0 / 9.0;
        // A point straight ahead projects to the NDC center.
        let ndc = cam.project(Vec3::new(0.0, 1.0, 0.0), aspect).unwrap();
        assert!(ndc.length() < 1e-5);
        // Behind the camera: rejected.
        assert!(cam.project(Vec3::new(0.0, 1.0, 10.0), aspect).is_none());

        // Shooting a ray through uv and projecting a point along it lands on
        // the same ndc.
        let uv = Vec2::new(0.25, 0.7);
        let (o, d) = cam.ray(uv, aspect);
        let p = o + d * 3.0;
        let ndc = cam.project(p, aspect).expect("in front of the camera");
        let expect = Vec2::new(2.0 * uv.x - 1.0, 1.0 - 2.0 * uv.y);
        assert!((ndc - expect).length() < 1e-4);
    }
}
