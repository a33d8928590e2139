// THEORY:
// The `GridManager` module decides which pixels are classified on a given frame.
// Classifying every pixel is too slow for the camera frame rate, so only pixels
// on a grid with stride S are looked at. The grid is shifted diagonally by a
// phase in 0..S that advances on every frame, so over S frames every diagonal
// position of each S x S block gets its turn.
//
// Key pieces:
// 1.  **GridScanner**: owns the stride and the rotating phase, and extracts one
//     `SampleSet` per frame. While it walks the grid it also sums hue,
//     saturation and brightness of everything it sampled.
// 2.  **SampleSet**: the sampled points with their feature vectors. It is shared
//     read-only by every object class; each class classifies it into its own
//     `LabelGrid`.
// 3.  **LabelGrid**: a frame-sized buffer where sampled cells carry a label and
//     everything else is `Unsampled`. The blob extractor later marks cells it has
//     claimed as `Claimed`. The grid remembers which cells it wrote, so clearing
//     it for the next frame costs one write per sample instead of one per pixel.
// 4.  **RollingColorStats**: the previous frame's average color. The pipeline
//     finalizes the scanner's sums into it once per frame, after every class is
//     done, and the next frame feeds it to the classifiers as context.

use crate::core_modules::classifier::{FeatureVector, Label, PixelClassifier};
use crate::core_modules::frame::HsvImage;

/// State of one cell of the label buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cell {
    /// Not on this frame's sampling grid.
    Unsampled,
    Sampled(Label),
    /// Already assigned to a blob.
    Claimed,
}

/// Frame-sized label buffer for one object class.
#[derive(Debug, Clone)]
pub struct LabelGrid {
    width: u32,
    height: u32,
    cells: Vec<Cell>,
    /// Indices written since the last reset.
    touched: Vec<usize>,
}

impl LabelGrid {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            cells: vec![Cell::Unsampled; (width as usize) * (height as usize)],
            touched: Vec::new(),
        }
    }

    /// Forgets every label from the previous frame. Only a size change
    /// reallocates; otherwise just the touched cells are cleared.
    pub fn reset(&mut self, width: u32, height: u32) {
        if (width, height) == (self.width, self.height) {
            for index in self.touched.drain(..) {
                self.cells[index] = Cell::Unsampled;
            }
            return;
        }
        self.width = width;
        self.height = height;
        self.touched.clear();
        self.cells.clear();
        self.cells
            .resize((width as usize) * (height as usize), Cell::Unsampled);
    }

    /// Cells written since the last reset.
    pub fn touched(&self) -> usize {
        self.touched.len()
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Out-of-range reads are `Unsampled`.
    pub fn get(&self, x: u32, y: u32) -> Cell {
        if x >= self.width || y >= self.height {
            return Cell::Unsampled;
        }
        self.cells[self.index(x, y)]
    }

    pub fn set(&mut self, x: u32, y: u32, cell: Cell) {
        if x < self.width && y < self.height {
            let index = self.index(x, y);
            if self.cells[index] == Cell::Unsampled && cell != Cell::Unsampled {
                self.touched.push(index);
            }
            self.cells[index] = cell;
        }
    }

    fn index(&self, x: u32, y: u32) -> usize {
        (y as usize) * (self.width as usize) + x as usize
    }
}

/// Average color of the previously processed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RollingColorStats {
    pub hue: u8,
    pub saturation: u8,
    pub brightness: u8,
}

/// Running sums collected while sampling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ColorSums {
    hue: u64,
    saturation: u64,
    brightness: u64,
    count: u64,
}

impl ColorSums {
    pub fn add(&mut self, [hue, saturation, value]: [u8; 3]) {
        self.hue += hue as u64;
        self.saturation += saturation as u64;
        self.brightness += value as u64;
        self.count += 1;
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Integer averages, or `None` when nothing was sampled.
    pub fn finalize(&self) -> Option<RollingColorStats> {
        if self.count == 0 {
            return None;
        }
        Some(RollingColorStats {
            hue: (self.hue / self.count) as u8,
            saturation: (self.saturation / self.count) as u8,
            brightness: (self.brightness / self.count) as u8,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridSample {
    pub x: u32,
    pub y: u32,
    pub features: FeatureVector,
}

/// Everything sampled from one frame.
#[derive(Debug, Clone)]
pub struct SampleSet {
    width: u32,
    height: u32,
    stride: u32,
    phase: u32,
    samples: Vec<GridSample>,
    sums: ColorSums,
}

impl SampleSet {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn stride(&self) -> u32 {
        self.stride
    }

    pub fn phase(&self) -> u32 {
        self.phase
    }

    pub fn samples(&self) -> &[GridSample] {
        &self.samples
    }

    pub fn sums(&self) -> ColorSums {
        self.sums
    }

    /// Clears `grid` and writes one label per sampled point.
    pub fn classify_into(&self, classifier: &dyn PixelClassifier, grid: &mut LabelGrid) {
        grid.reset(self.width, self.height);
        for sample in &self.samples {
            let label = classifier.classify(&sample.features);
            grid.set(sample.x, sample.y, Cell::Sampled(label));
        }
    }
}

/// Drives the sparse, phase-rotating sampling of a camera's frames.
#[derive(Debug, Clone)]
pub struct GridScanner {
    stride: u32,
    phase: u32,
}

impl GridScanner {
    pub fn new(stride: u32) -> Self {
        Self {
            stride: stride.max(1),
            phase: 0,
        }
    }

    pub fn stride(&self) -> u32 {
        self.stride
    }

    pub fn phase(&self) -> u32 {
        self.phase
    }

    /// Moves to the next phase; called once per processed frame.
    pub fn advance(&mut self) {
        self.phase = (self.phase + 1) % self.stride;
    }

    /// The (x, y) points sampled at the current phase, row by row.
    pub fn sample_points(&self, width: u32, height: u32) -> impl Iterator<Item = (u32, u32)> + use<> {
        let (phase, stride) = (self.phase, self.stride as usize);
        (phase..height)
            .step_by(stride)
            .flat_map(move |y| (phase..width).step_by(stride).map(move |x| (x, y)))
    }

    /// Samples `hsv` at the current phase. `context` is the previous frame's color average.
    pub fn scan(&self, hsv: &HsvImage, context: RollingColorStats) -> SampleSet {
        let (width, height) = hsv.dimensions();
        let mut sums = ColorSums::default();
        let samples = self
            .sample_points(width, height)
            .map(|(x, y)| {
                let pixel = hsv.get_pixel(x, y).0;
                sums.add(pixel);
                GridSample {
                    x,
                    y,
                    features: FeatureVector {
                        previous_saturation: context.saturation,
                        previous_brightness: context.brightness,
                        hue: pixel[0],
                        saturation: pixel[1],
                        value: pixel[2],
                    },
                }
            })
            .collect();

        SampleSet {
            width,
            height,
            stride: self.stride,
            phase: self.phase,
            samples,
            sums,
        }
    }
}
