//! Deterministic palette assignment keyed on pod name (SPEC_FULL §4.2).

use std::collections::HashMap;
use std::sync::Mutex;

use colors_transform::{Color as ColorTransform, Hsl};
use termcolor::Color;

/// Number of visually distinct colors in the palette. Hues are spread evenly
/// around the color wheel at fixed, high saturation/lightness so adjacent
/// palette entries stay easy to tell apart on a dark terminal background.
pub const PALETTE_SIZE: usize = 20;

fn build_palette() -> [Color; PALETTE_SIZE] {
    let mut palette = [Color::White; PALETTE_SIZE];
    for (i, slot) in palette.iter_mut().enumerate() {
        let hue = (i as f32) * (360.0 / PALETTE_SIZE as f32);
        let rgb = Hsl::from(hue, 65.0, 60.0).to_rgb();
        *slot = Color::Rgb(
            rgb.get_red().round() as u8,
            rgb.get_green().round() as u8,
            rgb.get_blue().round() as u8,
        );
    }
    palette
}

struct AssignerState {
    palette: [Color; PALETTE_SIZE],
    assigned: HashMap<String, usize>,
    next: usize,
}

/// Total function from pod names observed so far to palette indices. Once a
/// pod is assigned a color it keeps it for the whole run (SPEC_FULL §3
/// invariant). Interior mutability lets discovery, the manager, and the
/// rotation watcher all call `get` without threading `&mut` across tasks.
pub struct ColorAssigner {
    state: Mutex<AssignerState>,
}

impl ColorAssigner {
    pub fn new() -> ColorAssigner {
        ColorAssigner {
            state: Mutex::new(AssignerState {
                palette: build_palette(),
                assigned: HashMap::new(),
                next: 0,
            }),
        }
    }

    /// Sorts `pod_names` lexicographically and assigns indices `0, 1, ...`
    /// modulo the palette size in that order, so two runs over the same pod
    /// set get identical colors. Must be called before any `get` and only
    /// once per run.
    pub fn initialize<I, S>(&self, pod_names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut names: Vec<String> = pod_names.into_iter().map(Into::into).collect();
        names.sort();
        names.dedup();
        let mut state = self.state.lock().unwrap();
        for name in names {
            let idx = state.next % PALETTE_SIZE;
            state.next += 1;
            state.assigned.entry(name).or_insert(idx);
        }
    }

    /// The color for `pod_name`, assigning the next unused palette index
    /// (wrapping on the palette size) the first time it is seen.
    pub fn get(&self, pod_name: &str) -> Color {
        let mut state = self.state.lock().unwrap();
        if let Some(idx) = state.assigned.get(pod_name) {
            return state.palette[*idx];
        }
        let idx = state.next % PALETTE_SIZE;
        state.next += 1;
        state.assigned.insert(pod_name.to_string(), idx);
        state.palette[idx]
    }
}

impl Default for ColorAssigner {
    fn default() -> ColorAssigner {
        ColorAssigner::new()
    }
}
