use glam::{Vec2, Vec3};
use worldspace_common::Aabb;

/// A node selected for drawing by the last refresh.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TerrainNode {
    /// Minimum XZ corner in world space.
    pub origin: Vec2,
    pub size: f32,
    pub depth: u32,
}

impl TerrainNode {
    /// Detail tier: 0 at the leaves, increasing towards the root.
    pub fn lod(&self, max_depth: u32) -> u32 {
        max_depth.saturating_sub(self.depth)
    }
}

/// Square terrain region with four children above the maximum depth.
#[derive(Debug)]
pub struct QuadTreeNode {
    origin: Vec2,
    size: f32,
    depth: u32,
    bounds: Aabb,
    visible: bool,
    children: Option<Box<[QuadTreeNode; 4]>>,
}

impl QuadTreeNode {
    /// Build the subtree rooted at `origin` whose root is `chunk_size >> depth` wide.
    pub fn new(origin: Vec2, depth: u32, chunk_size: f32, max_depth: u32) -> Self {
        let size = chunk_size / (1u32 << depth) as f32;
        let half = size * 0.5;
        let bounds = Aabb::new(Vec3::new(origin.x + half, 0.0, origin.y + half), Vec3::splat(half));
        let children = (depth < max_depth).then(|| {
            let d = depth + 1;
            Box::new([
                QuadTreeNode::new(origin, d, chunk_size, max_depth),
                QuadTreeNode::new(origin + Vec2::new(0.0, half), d, chunk_size, max_depth),
                QuadTreeNode::new(origin + Vec2::new(half, 0.0), d, chunk_size, max_depth),
                QuadTreeNode::new(origin + Vec2::new(half, half), d, chunk_size, max_depth),
            ])
        });
        Self {
            origin,
            size,
            depth,
            bounds,
            visible: false,
            children,
        }
    }

    pub fn origin(&self) -> Vec2 {
        self.origin
    }

    pub fn size(&self) -> f32 {
        self.size
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn bounds(&self) -> &Aabb {
        &self.bounds
    }

    pub fn visible(&self) -> bool {
        self.visible
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_none()
    }

    pub fn children(&self) -> Option<&[QuadTreeNode; 4]> {
        self.children.as_deref()
    }

    fn node(&self) -> TerrainNode {
        TerrainNode {
            origin: self.origin,
            size: self.size,
            depth: self.depth,
        }
    }

    /// Select the coarsest nodes outside a detail window of `window` units
    /// centered on `center`; the window halves per level down to `min_window`.
    ///
    /// The window test ignores height: a viewer high above the terrain gets
    /// the same selection as one standing on it.
    pub fn refresh(&mut self, center: Vec3, window: f32, min_window: f32, visible: &mut Vec<TerrainNode>) {
        let window_bounds = Aabb::new(center, Vec3::splat(window * 0.5));
        if !self.bounds.intersects_xz(&window_bounds) {
            self.visible = true;
            visible.push(self.node());
            if let Some(children) = &mut self.children {
                children.iter_mut().for_each(QuadTreeNode::hide);
            }
            return;
        }
        match &mut self.children {
            None => {
                self.visible = true;
                visible.push(self.node());
            }
            Some(children) => {
                self.visible = false;
                let child_window = (window * 0.5).max(min_window);
                for child in children.iter_mut() {
                    child.refresh(center, child_window, min_window, visible);
                }
            }
        }
    }

    fn hide(&mut self) {
        self.visible = false;
        if let Some(children) = &mut self.children {
            children.iter_mut().for_each(QuadTreeNode::hide);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> QuadTreeNode {
        QuadTreeNode::new(Vec2::ZERO, 0, 1024.0, 4)
    }

    fn refresh(root: &mut QuadTreeNode, center: Vec3) -> Vec<TerrainNode> {
        let mut out = Vec::new();
        root.refresh(center, root.size() * 0.5, 64.0, &mut out);
        out
    }

    /// Every visible node has no visible ancestor.
    fn check_exclusive(node: &QuadTreeNode, ancestor_visible: bool) {
        assert!(!(ancestor_visible && node.visible()), "node at depth {} overlaps an ancestor", node.depth());
        if let Some(children) = node.children() {
            for child in children {
                check_exclusive(child, ancestor_visible || node.visible());
            }
        }
    }

    fn covered_area(nodes: &[TerrainNode]) -> f32 {
        nodes.iter().map(|n| n.size * n.size).sum()
    }

    #[test]
    fn node_sizes_and_child_order() {
        let root = tree();
        assert_eq!(root.size(), 1024.0);
        let children = root.children().unwrap();
        assert_eq!(children[0].origin(), Vec2::new(0.0, 0.0));
        assert_eq!(children[1].origin(), Vec2::new(0.0, 512.0));
        assert_eq!(children[2].origin(), Vec2::new(512.0, 0.0));
        assert_eq!(children[3].origin(), Vec2::new(512.0, 512.0));
        let mut node = &root;
        while let Some(children) = node.children() {
            node = &children[0];
        }
        assert_eq!(node.depth(), 4);
        assert_eq!(node.size(), 64.0);
    }

    #[test]
    fn far_viewer_selects_root_only() {
        let mut root = tree();
        let visible = refresh(&mut root, Vec3::new(5000.0, 0.0, 5000.0));
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].depth, 0);
        assert_eq!(visible[0].lod(4), 4);
        check_exclusive(&root, false);
    }

    #[test]
    fn viewer_height_does_not_change_selection() {
        let mut ground = tree();
        let mut above = tree();
        let low = refresh(&mut ground, Vec3::new(300.0, 0.0, 700.0));
        let high = refresh(&mut above, Vec3::new(300.0, 5000.0, 700.0));
        assert!(low.len() > 1);
        assert_eq!(low, high);
    }

    #[test]
    fn viewer_inside_refines_to_leaves() {
        let mut root = tree();
        let visible = refresh(&mut root, Vec3::new(300.0, 10.0, 700.0));
        check_exclusive(&root, false);
        assert!(visible.iter().any(|n| n.depth == 4));
        assert!(visible.len() <= 40);
        // Selected nodes tile the chunk exactly.
        assert_eq!(covered_area(&visible), 1024.0 * 1024.0);
        // The leaf under the viewer is selected.
        assert!(visible.iter().any(|n| {
            n.depth == 4 && (256.0..320.0).contains(&n.origin.x) && (640.0..704.0).contains(&n.origin.y)
        }));
    }

    #[test]
    fn moving_away_clears_descendants() {
        let mut root = tree();
        refresh(&mut root, Vec3::new(512.0, 0.0, 512.0));
        let visible = refresh(&mut root, Vec3::new(-4000.0, 0.0, 0.0));
        assert_eq!(visible.len(), 1);
        check_exclusive(&root, false);
        let mut stack = vec![&root];
        let mut visible_count = 0;
        while let Some(node) = stack.pop() {
            visible_count += node.visible() as usize;
            if let Some(children) = node.children() {
                stack.extend(children.iter());
            }
        }
        assert_eq!(visible_count, 1);
    }

    #[test]
    fn viewer_on_chunk_corner() {
        let mut root = tree();
        let visible = refresh(&mut root, Vec3::new(0.0, 0.0, 0.0));
        check_exclusive(&root, false);
        assert_eq!(covered_area(&visible), 1024.0 * 1024.0);
    }
}
