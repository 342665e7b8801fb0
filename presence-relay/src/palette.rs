use std::collections::HashMap;

use crossterm::style::Color;
use tokio::sync::Mutex;

/// Colors handed out to other participants, in first-seen order.
pub const PALETTE: [Color; 5] = [
    Color::Cyan,
    Color::Magenta,
    Color::Yellow,
    Color::Blue,
    Color::White,
];

/// Stable alias to color assignment. The first alias seen gets the first
/// palette entry, wrapping around once the palette is exhausted.
#[derive(Default)]
pub struct AliasPalette {
    state: Mutex<PaletteState>,
}

#[derive(Default)]
struct PaletteState {
    colors: HashMap<String, Color>,
    next: usize,
}

impl AliasPalette {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn color_for(&self, alias: &str) -> Color {
        let mut state = self.state.lock().await;
        if let Some(color) = state.colors.get(alias) {
            return *color;
        }

        let color = PALETTE[state.next % PALETTE.len()];
        state.next += 1;
        state.colors.insert(alias.to_string(), color);
        color
    }
}
