//! Translation of a rendered colour into per-fixture commands.

use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::{RenderedColor, Result};

/// Bridge hue for red.
pub const HUE_RED: u16 = 0;
/// Bridge hue for green.
pub const HUE_GREEN: u16 = 25_500;
/// Bridge hue for blue.
pub const HUE_BLUE: u16 = 46_920;
/// Exclusive upper bound of the bridge hue range.
pub const HUE_RANGE: u16 = 65_535;

/// Fixture count that is treated as a dedicated RGB triad.
const TRIAD_SIZE: usize = 3;

/// Last brightness a fixture reported to the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixtureState {
    pub brightness: u8,
}

/// New hue for one fixture, carrying its reported brightness unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixtureCommand {
    pub fixture: usize,
    pub hue: u16,
    pub brightness: u8,
}

/// What the delivery side should do with the current frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// No fixtures are connected; show the colour on screen.
    Simulated(RenderedColor),
    /// One command per known fixture, applied as a batch.
    Fixtures(Vec<FixtureCommand>),
    /// Capture stopped; carries the terminal off colour.
    Stopped(RenderedColor),
}

/// The physical lighting bridge as seen by the pipeline.
pub trait FixtureBridge: Send + Sync {
    fn is_connected(&self) -> bool;

    /// Last known state of every fixture, in fixture index order.
    fn fixtures(&self) -> Vec<FixtureState>;

    fn apply(&self, batch: &[FixtureCommand]) -> Result<()>;
}

/// On-screen stand-in for fixtures when no bridge is connected.
pub trait DemoDisplay: Send {
    fn show(&mut self, color: RenderedColor);

    fn stop(&mut self);
}

/// Maps rendered colours to fixture commands.
///
/// Exactly three fixtures are driven as a red, green and blue triad. Any
/// other count gets an independent random hue per fixture. Brightness always
/// comes from the fixture's own reported state.
#[derive(Debug)]
pub struct FixtureDispatcher<R = StdRng> {
    rng: R,
}

impl FixtureDispatcher<StdRng> {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Deterministic hues for a given seed.
    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }
}

impl Default for FixtureDispatcher<StdRng> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Rng> FixtureDispatcher<R> {
    pub fn with_rng(rng: R) -> Self {
        Self { rng }
    }

    /// Chooses between the simulation path and a command batch.
    ///
    /// `fixtures` is `None` when no bridge is connected.
    pub fn dispatch(
        &mut self,
        color: RenderedColor,
        fixtures: Option<&[FixtureState]>,
    ) -> Dispatch {
        match fixtures {
            None => Dispatch::Simulated(color),
            Some(fixtures) => Dispatch::Fixtures(self.commands(fixtures)),
        }
    }

    /// Builds one command per fixture.
    pub fn commands(&mut self, fixtures: &[FixtureState]) -> Vec<FixtureCommand> {
        if fixtures.len() == TRIAD_SIZE {
            return [HUE_RED, HUE_GREEN, HUE_BLUE]
                .into_iter()
                .zip(fixtures)
                .enumerate()
                .map(|(fixture, (hue, state))| FixtureCommand {
                    fixture,
                    hue,
                    brightness: state.brightness,
                })
                .collect();
        }

        fixtures
            .iter()
            .enumerate()
            .map(|(fixture, state)| FixtureCommand {
                fixture,
                hue: self.rng.gen_range(0..HUE_RANGE),
                brightness: state.brightness,
            })
            .collect()
    }
}
