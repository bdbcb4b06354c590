use bevy::math::Vec2;
use std::fmt;

/// Number of stacked visual tile layers.
pub const TILE_LAYER_COUNT: u8 = 3;

/// Integer grid position. Purely a key, never owns anything.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct Cell {
    pub x: i32,
    pub y: i32,
}

impl Cell {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn offset(self, dx: i32, dy: i32) -> Self {
        Self::new(self.x.saturating_add(dx), self.y.saturating_add(dy))
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// One of the three visual tile planes. Higher index draws on top.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct TileLayer(u8);

impl TileLayer {
    pub const GROUND: TileLayer = TileLayer(0);
    pub const MIDDLE: TileLayer = TileLayer(1);
    pub const TOP: TileLayer = TileLayer(2);

    pub fn new(index: u8) -> Option<Self> {
        (index < TILE_LAYER_COUNT).then_some(Self(index))
    }

    pub fn from_i64(index: i64) -> Option<Self> {
        u8::try_from(index).ok().and_then(Self::new)
    }

    pub fn index(self) -> u8 {
        self.0
    }

    /// Layers ordered from the topmost plane down.
    pub fn top_down() -> [TileLayer; 3] {
        [Self::TOP, Self::MIDDLE, Self::GROUND]
    }

    pub fn bottom_up() -> [TileLayer; 3] {
        [Self::GROUND, Self::MIDDLE, Self::TOP]
    }
}

impl fmt::Display for TileLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum GridError {
    OutOfBounds { x: i32, y: i32 },
}

impl fmt::Display for GridError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GridError::OutOfBounds { x, y } => write!(f, "cell ({x}, {y}) is outside the grid"),
        }
    }
}

impl std::error::Error for GridError {}

/// Fixed world dimensions. Never changes after construction.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct GridDims {
    width: i32,
    height: i32,
    tile_size: f32,
}

impl GridDims {
    pub fn new(width: u32, height: u32, tile_size: f32) -> Self {
        Self {
            width: width.min(i32::MAX as u32) as i32,
            height: height.min(i32::MAX as u32) as i32,
            tile_size: tile_size.max(1.0),
        }
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn tile_size(&self) -> f32 {
        self.tile_size
    }

    pub fn cell_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn in_bounds(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && x < self.width && y < self.height
    }

    pub fn check(&self, x: i32, y: i32) -> Result<Cell, GridError> {
        if self.in_bounds(x, y) {
            Ok(Cell::new(x, y))
        } else {
            Err(GridError::OutOfBounds { x, y })
        }
    }

    /// Flat index laid out layer-major, then row-major.
    #[allow(dead_code)]
    pub fn to_index(&self, x: i32, y: i32, layer: TileLayer) -> Result<usize, GridError> {
        let cell = self.check(x, y)?;
        Ok(layer.index() as usize * self.cell_count()
            + cell.y as usize * self.width as usize
            + cell.x as usize)
    }

    #[allow(dead_code)]
    pub fn from_index(&self, index: usize) -> Option<(Cell, TileLayer)> {
        let per_layer = self.cell_count();
        if per_layer == 0 {
            return None;
        }
        let layer = TileLayer::new(u8::try_from(index / per_layer).ok()?)?;
        let rem = index % per_layer;
        let x = (rem % self.width as usize) as i32;
        let y = (rem / self.width as usize) as i32;
        Some((Cell::new(x, y), layer))
    }

    pub fn cell_from_pixel(&self, pixel: Vec2, offset: Vec2) -> Cell {
        cell_from_pixel(pixel, self.tile_size, offset)
    }

    /// Top-left pixel of a cell in screen space (y grows downward).
    pub fn cell_origin(&self, cell: Cell, offset: Vec2) -> Vec2 {
        Vec2::new(
            offset.x + cell.x as f32 * self.tile_size,
            offset.y + cell.y as f32 * self.tile_size,
        )
    }

    pub fn pixel_size(&self) -> Vec2 {
        Vec2::new(
            self.width as f32 * self.tile_size,
            self.height as f32 * self.tile_size,
        )
    }
}

/// Floor division of a screen pixel into a cell. The result may be out of bounds.
pub fn cell_from_pixel(pixel: Vec2, tile_size: f32, offset: Vec2) -> Cell {
    let ts = tile_size.max(1.0);
    Cell::new(
        ((pixel.x - offset.x) / ts).floor() as i32,
        ((pixel.y - offset.y) / ts).floor() as i32,
    )
}
