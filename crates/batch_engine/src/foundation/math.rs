//! Math utilities and types
//!
//! 2D affine transforms are stored as homogeneous 3x3 matrices. Only the small
//! set of helpers needed to place quads in batch space lives here.

pub use nalgebra::{Matrix3, Point2, Vector2};

/// 2D vector type
pub type Vec2 = Vector2<f32>;

/// Homogeneous 2D affine transform
pub type Affine2 = Matrix3<f32>;

/// Axis-aligned rectangle in pixels (origin is the top-left corner of the region)
#[derive(Debug, Clone, Copy, PartialEq, Default, serde::Serialize, serde::Deserialize)]
pub struct Rect {
    /// Left edge
    pub x: f32,
    /// Top edge
    pub y: f32,
    /// Width
    pub width: f32,
    /// Height
    pub height: f32,
}

impl Rect {
    /// Create a new rectangle
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    /// Rectangle size as a vector
    pub fn size(&self) -> Vec2 {
        Vec2::new(self.width, self.height)
    }
}

/// Position / rotation / scale decomposition of a node transform
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform2D {
    /// Translation in parent space
    pub position: Vec2,
    /// Clockwise rotation in degrees
    pub rotation: f32,
    /// Scale factors
    pub scale: Vec2,
}

impl Default for Transform2D {
    fn default() -> Self {
        Self {
            position: Vec2::zeros(),
            rotation: 0.0,
            scale: Vec2::new(1.0, 1.0),
        }
    }
}

impl Transform2D {
    /// Build the node-to-parent matrix. `pivot` is the point (in local units)
    /// that rotation and scale are applied around and that lands on `position`.
    pub fn to_matrix(&self, pivot: Vec2) -> Affine2 {
        let radians = -self.rotation.to_radians();
        let (sin, cos) = radians.sin_cos();
        let (sx, sy) = (self.scale.x, self.scale.y);

        let linear = Affine2::new(
            cos * sx, -sin * sy, 0.0,
            sin * sx, cos * sy, 0.0,
            0.0, 0.0, 1.0,
        );
        let offset = linear.transform_point(&Point2::new(-pivot.x, -pivot.y));

        let mut matrix = linear;
        matrix[(0, 2)] = self.position.x + offset.x;
        matrix[(1, 2)] = self.position.y + offset.y;
        matrix
    }
}

/// Apply an affine transform to a point
pub fn transform_point(matrix: &Affine2, x: f32, y: f32) -> Vec2 {
    let p = matrix.transform_point(&Point2::new(x, y));
    Vec2::new(p.x, p.y)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_identity_transform() {
        let matrix = Transform2D::default().to_matrix(Vec2::zeros());
        let p = transform_point(&matrix, 3.0, 4.0);
        assert_relative_eq!(p.x, 3.0);
        assert_relative_eq!(p.y, 4.0);
    }

    #[test]
    fn test_pivot_lands_on_position() {
        let transform = Transform2D {
            position: Vec2::new(100.0, 50.0),
            rotation: 90.0,
            scale: Vec2::new(2.0, 2.0),
        };
        let matrix = transform.to_matrix(Vec2::new(8.0, 8.0));
        let p = transform_point(&matrix, 8.0, 8.0);
        assert_relative_eq!(p.x, 100.0, epsilon = 1e-4);
        assert_relative_eq!(p.y, 50.0, epsilon = 1e-4);
    }

    #[test]
    fn test_clockwise_rotation() {
        let transform = Transform2D {
            rotation: 90.0,
            ..Transform2D::default()
        };
        let matrix = transform.to_matrix(Vec2::zeros());
        let p = transform_point(&matrix, 1.0, 0.0);
        assert_relative_eq!(p.x, 0.0, epsilon = 1e-5);
        assert_relative_eq!(p.y, -1.0, epsilon = 1e-5);
    }
}
