use bulbdj_core::{
    DemoDisplay, FixtureBridge, FixtureCommand, FixtureState, RenderedColor, Result,
};
use parking_lot::Mutex;

/// Prints the simulated colour instead of drawing it.
#[derive(Debug, Default)]
pub struct ConsoleDisplay {
    frames: u64,
}

impl DemoDisplay for ConsoleDisplay {
    fn show(&mut self, color: RenderedColor) {
        self.frames += 1;
        let rgb = color.display_rgb();
        tracing::info!(
            frame = self.frames,
            r = rgb.r,
            g = rgb.g,
            b = rgb.b,
            brightness = color.brightness,
            "demo"
        );
    }

    fn stop(&mut self) {
        tracing::info!(frames = self.frames, "demo stopped");
    }
}

/// In-memory stand-in for a lighting bridge with a fixed set of lamps.
#[derive(Debug)]
pub struct SimulatedBridge {
    fixtures: Mutex<Vec<(FixtureState, u16)>>,
}

impl SimulatedBridge {
    pub fn new(count: usize, brightness: u8) -> Self {
        Self {
            fixtures: Mutex::new(vec![(FixtureState { brightness }, 0); count]),
        }
    }
}

impl FixtureBridge for SimulatedBridge {
    fn is_connected(&self) -> bool {
        true
    }

    fn fixtures(&self) -> Vec<FixtureState> {
        self.fixtures.lock().iter().map(|(state, _)| *state).collect()
    }

    fn apply(&self, batch: &[FixtureCommand]) -> Result<()> {
        let mut fixtures = self.fixtures.lock();
        for command in batch {
            if let Some((state, hue)) = fixtures.get_mut(command.fixture) {
                state.brightness = command.brightness;
                *hue = command.hue;
            }
        }
        let hues: Vec<u16> = fixtures.iter().map(|(_, hue)| *hue).collect();
        tracing::info!(?hues, "fixtures updated");
        Ok(())
    }
}
