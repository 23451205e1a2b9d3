#[derive(Debug, Clone, Copy, PartialEq, uniffi::Record)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum TextAlign {
    Left,
    Center,
    Right,
}

/// One drawing instruction. Colors are `0xRRGGBB`, widths and sizes in pixels, and the
/// origin is the top-left corner of the view.
#[derive(Debug, Clone, PartialEq, uniffi::Enum)]
pub enum DrawOp {
    Clear {
        width: f64,
        height: f64,
    },
    Line {
        from: Point,
        to: Point,
        color: u32,
        width: f64,
    },
    Path {
        points: Vec<Point>,
        color: u32,
        width: f64,
    },
    Text {
        at: Point,
        text: String,
        color: u32,
        size: f64,
        align: TextAlign,
    },
}

/// Drawing target of the renderer.
pub trait Canvas {
    fn draw(&mut self, op: DrawOp);
}

/// Records operations so they can be handed to the host in one batch.
#[derive(Debug, Default, Clone)]
pub struct DisplayList {
    ops: Vec<DrawOp>,
}

impl DisplayList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ops(&self) -> &[DrawOp] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn take(&mut self) -> Vec<DrawOp> {
        std::mem::take(&mut self.ops)
    }
}

impl Canvas for DisplayList {
    fn draw(&mut self, op: DrawOp) {
        self.ops.push(op);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_hands_out_ops_in_draw_order() {
        let mut list = DisplayList::new();
        list.draw(DrawOp::Clear { width: 1.0, height: 1.0 });
        list.draw(DrawOp::Path { points: vec![], color: 1, width: 1.0 });

        let ops = list.take();
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0], DrawOp::Clear { width: 1.0, height: 1.0 });
        assert!(list.is_empty());
    }
}
