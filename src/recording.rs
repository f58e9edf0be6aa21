use crate::error::SvgError;
use crate::path::Path;
use crate::surface::{Brush, ClipRegion, CombineMode, FillRule, Pen, Surface};
use crate::types::{Matrix, Rect};

/// One call observed by a [`RecordingSurface`]. Drawing commands carry the
/// transform, clip and smoothing state in effect when they were issued.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SetTransform(Matrix),
    SetClip {
        region: ClipRegion,
        mode: CombineMode,
    },
    SetSmoothing(bool),
    Fill {
        brush: Brush,
        path: Path,
        rule: FillRule,
        transform: Matrix,
        clip: ClipRegion,
        smoothing: bool,
    },
    Stroke {
        pen: Pen,
        path: Path,
        transform: Matrix,
        clip: ClipRegion,
        smoothing: bool,
    },
    DrawPixmap {
        x: i32,
        y: i32,
        width: u32,
        height: u32,
    },
    DrawImage {
        dest: Rect,
        transform: Matrix,
        width: u32,
        height: u32,
    },
}

/// Surface that records the command stream instead of drawing.
#[derive(Debug, Clone)]
pub struct RecordingSurface {
    width: u32,
    height: u32,
    transform: Matrix,
    clip: ClipRegion,
    smoothing: bool,
    commands: Vec<Command>,
}

impl RecordingSurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            transform: Matrix::identity(),
            clip: ClipRegion::infinite(),
            smoothing: true,
            commands: Vec::new(),
        }
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn take_commands(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.commands)
    }

    pub fn fills(&self) -> impl Iterator<Item = &Command> {
        self.commands
            .iter()
            .filter(|c| matches!(c, Command::Fill { .. }))
    }

    pub fn strokes(&self) -> impl Iterator<Item = &Command> {
        self.commands
            .iter()
            .filter(|c| matches!(c, Command::Stroke { .. }))
    }
}

impl Surface for RecordingSurface {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn transform(&self) -> Matrix {
        self.transform
    }

    fn set_transform(&mut self, transform: Matrix) {
        self.transform = transform;
        self.commands.push(Command::SetTransform(transform));
    }

    fn clip(&self) -> ClipRegion {
        self.clip.clone()
    }

    fn set_clip(&mut self, region: &ClipRegion, mode: CombineMode) {
        self.clip = match mode {
            CombineMode::Replace => region.clone(),
            CombineMode::Intersect => self.clip.intersect(region),
        };
        self.commands.push(Command::SetClip {
            region: region.clone(),
            mode,
        });
    }

    fn smoothing(&self) -> bool {
        self.smoothing
    }

    fn set_smoothing(&mut self, enabled: bool) {
        self.smoothing = enabled;
        self.commands.push(Command::SetSmoothing(enabled));
    }

    fn fill_path(&mut self, brush: &Brush, path: &Path, rule: FillRule) -> Result<(), SvgError> {
        self.commands.push(Command::Fill {
            brush: brush.clone(),
            path: path.clone(),
            rule,
            transform: self.transform,
            clip: self.clip.clone(),
            smoothing: self.smoothing,
        });
        Ok(())
    }

    fn stroke_path(&mut self, pen: &Pen, path: &Path) -> Result<(), SvgError> {
        self.commands.push(Command::Stroke {
            pen: pen.clone(),
            path: path.clone(),
            transform: self.transform,
            clip: self.clip.clone(),
            smoothing: self.smoothing,
        });
        Ok(())
    }

    fn draw_pixmap(
        &mut self,
        pixmap: &tiny_skia::Pixmap,
        x: i32,
        y: i32,
    ) -> Result<(), SvgError> {
        self.commands.push(Command::DrawPixmap {
            x,
            y,
            width: pixmap.width(),
            height: pixmap.height(),
        });
        Ok(())
    }

    fn draw_image(&mut self, image: &tiny_skia::Pixmap, dest: Rect) -> Result<(), SvgError> {
        self.commands.push(Command::DrawImage {
            dest,
            transform: self.transform,
            width: image.width(),
            height: image.height(),
        });
        Ok(())
    }
}
