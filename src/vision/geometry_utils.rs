use serde::{Deserialize, Serialize};
use vek::Vec2;

/// 邊界判定的容許誤差
pub const EDGE_EPSILON: f32 = 1e-3;

/// 邊界矩形
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: Vec2<f32>,
    pub max: Vec2<f32>,
}

impl Bounds {
    pub fn new(min: Vec2<f32>, max: Vec2<f32>) -> Self {
        Self { min, max }
    }

    /// 由點集合計算外接矩形
    pub fn from_points(points: &[Vec2<f32>]) -> Option<Self> {
        let first = *points.first()?;
        let mut bounds = Self { min: first, max: first };
        for p in &points[1..] {
            bounds.min.x = bounds.min.x.min(p.x);
            bounds.min.y = bounds.min.y.min(p.y);
            bounds.max.x = bounds.max.x.max(p.x);
            bounds.max.y = bounds.max.y.max(p.y);
        }
        Some(bounds)
    }

    /// 向外擴張後判斷是否包含
    pub fn contains_point_padded(&self, point: Vec2<f32>, pad: f32) -> bool {
        point.x >= self.min.x - pad && point.x <= self.max.x + pad &&
        point.y >= self.min.y - pad && point.y <= self.max.y + pad
    }

    pub fn width(&self) -> f32 {
        self.max.x - self.min.x
    }

    pub fn height(&self) -> f32 {
        self.max.y - self.min.y
    }

    /// 點到矩形四角的最遠距離
    pub fn farthest_corner_distance(&self, point: Vec2<f32>) -> f32 {
        [
            self.min,
            self.max,
            Vec2::new(self.min.x, self.max.y),
            Vec2::new(self.max.x, self.min.y),
        ]
        .iter()
        .map(|corner| corner.distance(point))
        .fold(0.0, f32::max)
    }
}

pub struct GeometryUtils;

impl GeometryUtils {
    /// 計算點到線段的最短距離
    pub fn point_to_line_distance(point: Vec2<f32>, line_start: Vec2<f32>, line_end: Vec2<f32>) -> f32 {
        let line_vec = line_end - line_start;
        let point_vec = point - line_start;

        let line_length_sq = line_vec.magnitude_squared();
        if line_length_sq == 0.0 {
            return point_vec.magnitude();
        }

        let t = (point_vec.dot(line_vec) / line_length_sq).max(0.0).min(1.0);
        let projection = line_start + line_vec * t;
        (point - projection).magnitude()
    }

    /// 射線與線段相交，回傳沿射線的距離
    ///
    /// `direction` 須為單位向量；平行或背向時回傳 None
    pub fn ray_segment_intersection(
        origin: Vec2<f32>,
        direction: Vec2<f32>,
        seg_start: Vec2<f32>,
        seg_end: Vec2<f32>,
    ) -> Option<f32> {
        let seg = seg_end - seg_start;
        let cross = direction.x * seg.y - direction.y * seg.x;
        if cross.abs() < 1e-9 {
            return None;
        }

        let diff = seg_start - origin;
        let t = (diff.x * seg.y - diff.y * seg.x) / cross;
        let u = (diff.x * direction.y - diff.y * direction.x) / cross;

        if t >= 0.0 && (0.0..=1.0).contains(&u) {
            Some(t)
        } else {
            None
        }
    }

    /// 點是否在多邊形內（邊界也算在內）
    pub fn point_in_polygon_inclusive(point: Vec2<f32>, vertices: &[Vec2<f32>]) -> bool {
        let n = vertices.len();
        if n < 3 {
            return false;
        }

        // 邊上的點視為可見，避免視線邊緣閃爍
        let mut j = n - 1;
        for i in 0..n {
            if Self::point_to_line_distance(point, vertices[j], vertices[i]) <= EDGE_EPSILON {
                return true;
            }
            j = i;
        }

        // 射線投射法
        let mut inside = false;
        let mut j = n - 1;
        for i in 0..n {
            if ((vertices[i].y > point.y) != (vertices[j].y > point.y)) &&
               (point.x < (vertices[j].x - vertices[i].x) * (point.y - vertices[i].y) /
                         (vertices[j].y - vertices[i].y) + vertices[i].x) {
                inside = !inside;
            }
            j = i;
        }

        inside
    }

    /// 多邊形面積（鞋帶公式）
    pub fn polygon_area(vertices: &[Vec2<f32>]) -> f32 {
        if vertices.len() < 3 {
            return 0.0;
        }

        let mut area = 0.0;
        let n = vertices.len();
        for i in 0..n {
            let j = (i + 1) % n;
            area += vertices[i].x * vertices[j].y;
            area -= vertices[j].x * vertices[i].y;
        }
        area.abs() / 2.0
    }
}
