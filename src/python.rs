//! Python bindings, compiled only with the `python` feature. Exposes the
//! simulator surface as an extension module named `avoidance_core`.

use pyo3::prelude::*;

use crate::simulator::Simulator;
use crate::structs::{Config, Vector2D};

#[pyclass(name = "Config")]
#[derive(Clone)]
pub struct PyConfig {
    inner: Config,
}

#[pymethods]
impl PyConfig {
    #[new]
    #[pyo3(signature = (
        sub_steps = 2,
        fixing_steps = 2,
        leaf_size_max = 10,
        horizontal_factor = 18.0,
        distance_ignore_factor = 2.0,
        neighbor_factor = 8.5,
        space_factor = 0.01,
        failure_recording = false,
        conflict_tolerance = 0.01,
    ))]
    #[allow(clippy::too_many_arguments)]
    fn new(
        sub_steps: u32,
        fixing_steps: u32,
        leaf_size_max: usize,
        horizontal_factor: f64,
        distance_ignore_factor: f64,
        neighbor_factor: f64,
        space_factor: f64,
        failure_recording: bool,
        conflict_tolerance: f64,
    ) -> Self {
        PyConfig {
            inner: Config {
                sub_steps,
                fixing_steps,
                leaf_size_max,
                horizontal_factor,
                distance_ignore_factor,
                neighbor_factor,
                space_factor,
                failure_recording,
                conflict_tolerance,
            },
        }
    }
}

#[pyclass(name = "Simulator")]
pub struct PySimulator {
    inner: Simulator,
}

#[pymethods]
impl PySimulator {
    #[new]
    #[pyo3(signature = (config = None))]
    fn new(config: Option<PyConfig>) -> Self {
        let config = config.map(|c| c.inner).unwrap_or_default();
        PySimulator {
            inner: Simulator::new(config),
        }
    }

    /// Creates an agent with zeroed state and returns its id.
    fn create_agent(&mut self) -> usize {
        self.inner.create_agent().id()
    }

    fn remove_agent(&mut self, id: usize) -> bool {
        self.inner.remove_agent(id)
    }

    fn agent_count(&self) -> usize {
        self.inner.agent_count()
    }

    fn set_position(&mut self, id: usize, x: f64, y: f64) -> bool {
        match self.inner.get_agent_mut(id) {
            Some(agent) => {
                agent.position = Vector2D::new(x, y);
                true
            }
            None => false,
        }
    }

    fn set_goal(&mut self, id: usize, x: f64, y: f64) -> bool {
        match self.inner.get_agent_mut(id) {
            Some(agent) => {
                agent.goal = Vector2D::new(x, y);
                true
            }
            None => false,
        }
    }

    fn set_speed(&mut self, id: usize, speed: f64) -> bool {
        match self.inner.get_agent_mut(id) {
            Some(agent) => {
                agent.speed = speed;
                true
            }
            None => false,
        }
    }

    fn set_radius(&mut self, id: usize, radius: f64) -> bool {
        match self.inner.get_agent_mut(id) {
            Some(agent) => {
                agent.radius = radius;
                true
            }
            None => false,
        }
    }

    fn position(&mut self, id: usize) -> Option<(f64, f64)> {
        self.inner
            .get_agent(id)
            .map(|agent| (agent.position.x, agent.position.y))
    }

    fn step(&mut self, delta_time: f64) {
        self.inner.step(delta_time);
    }

    fn failure_rate(&self) -> f64 {
        self.inner.failure_rate()
    }
}

#[pymodule]
fn avoidance_core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyConfig>()?;
    m.add_class::<PySimulator>()?;
    Ok(())
}
