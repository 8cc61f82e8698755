use glam::{Mat4, Vec3};

/// Y-up orbit camera used for impostor previews.
#[derive(Debug, Clone)]
pub struct Camera {
    // --- Orbital Parameters (Primary State) ---
    /// The world point the camera orbits around.
    pub target: Vec3,
    /// Distance from the camera to the target.
    pub radius: f32,
    /// Azimuth around +Y, measured from +Z towards +X (radians).
    pub azimuth_rad: f32,
    /// Elevation above the XZ plane (radians).
    pub elevation_rad: f32,

    // --- Derived Properties (Updated by `update()`) ---
    position: Vec3,

    // --- Projection ---
    pub fovy_rad: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Camera {
    pub fn new(target: Vec3, radius: f32, aspect: f32) -> Self {
        let mut camera = Self {
            target,
            radius,
            azimuth_rad: 30.0f32.to_radians(),
            elevation_rad: 25.0f32.to_radians(),
            position: Vec3::ZERO,
            fovy_rad: 45.0f32.to_radians(),
            aspect,
            near: 0.05,
            far: 1000.0,
        };
        camera.update();
        camera
    }

    /// Recomputes the position from the orbital parameters. Call after
    /// changing any of them.
    pub fn update(&mut self) {
        self.elevation_rad = self
            .elevation_rad
            .clamp(-89.0f32.to_radians(), 89.0f32.to_radians());
        let (sin_az, cos_az) = self.azimuth_rad.sin_cos();
        let (sin_el, cos_el) = self.elevation_rad.sin_cos();
        let offset = Vec3::new(cos_el * sin_az, sin_el, cos_el * cos_az) * self.radius;
        self.position = self.target + offset;
    }

    #[inline]
    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, Vec3::Y)
    }

    /// Perspective with wgpu's `[0,1]` depth range.
    pub fn proj(&self) -> Mat4 {
        Mat4::perspective_rh(self.fovy_rad, self.aspect, self.near, self.far)
    }

    pub fn view_proj(&self) -> Mat4 {
        self.proj() * self.view()
    }

    /// World-space right and up of the image plane, for billboards.
    pub fn billboard_axes(&self) -> (Vec3, Vec3) {
        let forward = (self.target - self.position).normalize();
        let right = forward.cross(Vec3::Y).normalize();
        let up = right.cross(forward);
        (right, up)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orbit_keeps_the_radius() {
        let mut cam = Camera::new(Vec3::new(1.0, 2.0, 3.0), 5.0, 1.0);
        for az in [0.0f32, 1.0, 2.5, -3.0] {
            cam.azimuth_rad = az;
            cam.update();
            assert!((cam.position().distance(cam.target) - 5.0).abs() < 1e-4);
        }
    }

    #[test]
    fn target_projects_to_the_centre() {
        let cam = Camera::new(Vec3::ZERO, 4.0, 1.5);
        let ndc = cam.view_proj().project_point3(Vec3::ZERO);
        assert!(ndc.x.abs() < 1e-5 && ndc.y.abs() < 1e-5);
        assert!((0.0..=1.0).contains(&ndc.z));
    }

    #[test]
    fn billboard_axes_are_orthonormal_and_face_the_camera() {
        let cam = Camera::new(Vec3::ZERO, 3.0, 1.0);
        let (right, up) = cam.billboard_axes();
        let to_cam = (cam.position() - cam.target).normalize();
        assert!(right.dot(up).abs() < 1e-5);
        assert!(right.dot(to_cam).abs() < 1e-5);
        assert!(up.dot(to_cam).abs() < 1e-5);
        assert!(up.y > 0.0);
    }
}
