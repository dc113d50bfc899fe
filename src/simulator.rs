//! # Local Avoidance Simulator
//!
//! Iterative local collision avoidance for circular agents on a 2D plane.
//! Each step is split into sub-steps; every sub-step runs a short fixed-point
//! refinement where agents query their neighborhood through the KD-tree,
//! steer laterally away from imminent conflicts, and finally apply a
//! collision-limited displacement.
//!
//! The solver has no global planner and no inter-agent negotiation: each
//! agent reacts only to what the spatial query returns. With the default
//! tuning this keeps dense crossings separated while every agent still makes
//! monotone progress toward its goal.

use std::collections::HashMap;

use crate::kdtree::{KdTree, Positioned};
use crate::structs::{Agent, Config, Vector2D};

/// Index payload: an agent's slot and a position snapshot. Re-synced from the
/// agent list before every rebuild so snapshots never go stale.
#[derive(Debug, Clone, Copy)]
struct SpatialEntry {
    slot: usize,
    position: Vector2D,
}

impl Positioned for SpatialEntry {
    fn position(&self) -> Vector2D {
        self.position
    }
}

/// Owns the agent population, the spatial index and the tuning parameters.
///
/// Agents are created and removed by id; between steps callers mutate
/// `goal` / `speed` / `radius` / `position` through
/// [`get_agent_mut`](Simulator::get_agent_mut) and read `position` back
/// after [`step`](Simulator::step).
pub struct Simulator {
    config: Config,
    tree: KdTree<SpatialEntry>,
    agents: Vec<Agent>,
    /// Lazily rebuilt after removals; slots shift under `swap_remove`.
    index_by_id: HashMap<usize, usize>,
    index_dirty: bool,
    next_id: usize,
    /// Scratch buffer for neighbor queries, reused across agents and steps.
    query_buf: Vec<SpatialEntry>,
    pairs_checked: u64,
    conflicts: u64,
}

impl Simulator {
    pub fn new(config: Config) -> Self {
        let mut tree = KdTree::new();
        tree.set_leaf_size_max(config.leaf_size_max);
        Simulator {
            config,
            tree,
            agents: Vec::new(),
            index_by_id: HashMap::new(),
            index_dirty: false,
            next_id: 0,
            query_buf: Vec::new(),
            pairs_checked: 0,
            conflicts: 0,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// All live agents, in slot order. Slot order changes on removal.
    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    /// Creates an agent with a fresh id and zeroed state and returns it for
    /// initialization. Ids are never reused.
    pub fn create_agent(&mut self) -> &mut Agent {
        let id = self.next_id;
        self.next_id += 1;
        let slot = self.agents.len();
        self.agents.push(Agent::new(id));
        self.index_by_id.insert(id, slot);
        &mut self.agents[slot]
    }

    pub fn get_agent(&mut self, id: usize) -> Option<&Agent> {
        let slot = self.slot_of(id)?;
        Some(&self.agents[slot])
    }

    pub fn get_agent_mut(&mut self, id: usize) -> Option<&mut Agent> {
        let slot = self.slot_of(id)?;
        Some(&mut self.agents[slot])
    }

    /// Removes the agent with the given id. Returns whether it existed.
    pub fn remove_agent(&mut self, id: usize) -> bool {
        let Some(slot) = self.slot_of(id) else {
            return false;
        };
        self.agents.swap_remove(slot);
        self.index_by_id.remove(&id);
        self.index_dirty = true;
        true
    }

    /// Advances the simulation by `delta_time`, split evenly across the
    /// configured sub-steps (a zero sub-step count is treated as one).
    pub fn step(&mut self, delta_time: f64) {
        let sub_steps = self.config.sub_steps.max(1);
        let dt = delta_time / f64::from(sub_steps);
        for _ in 0..sub_steps {
            self.sub_step(dt);
        }
        if self.config.failure_recording {
            self.record_conflicts();
        }
    }

    /// Fraction of sampled agent pairs found in conflict, over the lifetime
    /// of the simulator. Zero when recording is off or nothing was sampled.
    pub fn failure_rate(&self) -> f64 {
        if self.pairs_checked == 0 {
            return 0.0;
        }
        self.conflicts as f64 / self.pairs_checked as f64
    }

    fn slot_of(&mut self, id: usize) -> Option<usize> {
        if self.index_dirty {
            self.index_by_id.clear();
            for (slot, agent) in self.agents.iter().enumerate() {
                self.index_by_id.insert(agent.id(), slot);
            }
            self.index_dirty = false;
        }
        self.index_by_id.get(&id).copied()
    }

    /// One sub-step: refine pending moves over `1 + fixing_steps` rounds of
    /// (rebuild index, gather neighbors, steer), then commit displacements.
    fn sub_step(&mut self, dt: f64) {
        for agent in &mut self.agents {
            agent.pending_move = agent.goal - agent.position;
        }

        for _ in 0..1 + self.config.fixing_steps {
            self.sync_index();
            self.tree.rebuild();
            self.gather_neighbors();
            for slot in 0..self.agents.len() {
                self.apply_avoidance(slot, dt);
            }
        }

        for slot in 0..self.agents.len() {
            self.move_agent(slot);
        }
    }

    fn sync_index(&mut self) {
        self.tree.clear();
        self.tree.add_all(
            self.agents
                .iter()
                .enumerate()
                .map(|(slot, agent)| SpatialEntry {
                    slot,
                    position: agent.position,
                }),
        );
    }

    fn gather_neighbors(&mut self) {
        for slot in 0..self.agents.len() {
            let center = self.agents[slot].position;
            self.tree
                .query_in_range(center, self.config.neighbor_factor, &mut self.query_buf);
            let agent = &mut self.agents[slot];
            agent.neighbors.clear();
            agent
                .neighbors
                .extend(self.query_buf.iter().map(|entry| entry.slot));
        }
    }

    /// Steers one agent's pending move laterally away from imminent
    /// conflicts among its neighbors.
    ///
    /// The correction is order-dependent by design: each flagged conflict
    /// renormalizes the working direction before the next neighbor is
    /// examined, and the accumulated left/right biases are applied to the
    /// desired direction at the end.
    fn apply_avoidance(&mut self, slot: usize, dt: f64) {
        let (position, radius, speed, goal) = {
            let agent = &self.agents[slot];
            (agent.position, agent.radius, agent.speed, agent.goal)
        };

        let desired = goal - position;
        let mut direction = desired;
        let mut perp = desired.perpendicular();
        let mut avoid_left = 0.0;
        let mut avoid_right = 0.0;

        let mut collisions = std::mem::take(&mut self.agents[slot].collisions);
        collisions.clear();

        for i in 0..self.agents[slot].neighbors.len() {
            let other = self.agents[slot].neighbors[i];
            if other == slot {
                continue;
            }
            let neighbor = &self.agents[other];
            let relative_pos = position - neighbor.position;

            // Only neighbors ahead of the desired motion matter.
            if desired.dot(&-relative_pos) <= 0.0 {
                continue;
            }

            let min_dist_allow = (radius + neighbor.radius) * (1.0 + self.config.space_factor);
            let distance_ignore = speed * dt * self.config.distance_ignore_factor + min_dist_allow;
            let distance_sq = relative_pos.sqr_magnitude();
            if distance_sq > distance_ignore * distance_ignore {
                continue;
            }

            // Imminent when both the forward and the lateral separation are
            // already inside the allowed minimum.
            let lateral = relative_pos.dot(&perp);
            if relative_pos.dot(&direction) < min_dist_allow && lateral.abs() < min_dist_allow {
                let distance = distance_sq.sqrt();
                let gain = self.config.horizontal_factor;
                if lateral > 0.0 {
                    avoid_right += (min_dist_allow - lateral) * gain * distance;
                    direction = (direction + perp * avoid_right).normalized();
                } else {
                    avoid_left += (min_dist_allow + lateral) * gain * distance;
                    direction = (direction - perp * avoid_left).normalized();
                }
                perp = direction.perpendicular();
                collisions.push(other);
            }
        }

        let correction = desired.perpendicular() * (avoid_right - avoid_left);
        let steered = (desired + correction).normalized();
        let magnitude = (speed * dt).min(goal.distance(&position));

        let agent = &mut self.agents[slot];
        agent.collisions = collisions;
        agent.pending_move = steered * magnitude;
    }

    /// Commits one agent's pending move, first clamping it against every
    /// flagged conflict so the pair's relative motion cannot close the
    /// remaining gap in a single sub-step.
    fn move_agent(&mut self, slot: usize) {
        for i in 0..self.agents[slot].collisions.len() {
            let other = self.agents[slot].collisions[i];
            let agent = &self.agents[slot];
            let neighbor = &self.agents[other];

            let relative_move = agent.pending_move - neighbor.pending_move;
            let relative_pos = agent.position - neighbor.position;
            let gap = relative_pos.magnitude() - agent.radius - neighbor.radius;
            let projection = (relative_pos.normalized() * gap).dot(&relative_move);
            if projection > 0.0 {
                let agent = &mut self.agents[slot];
                let clamped = agent.pending_move.magnitude().min(projection.abs());
                agent.pending_move = agent.pending_move.normalized() * clamped;
            }
        }

        let agent = &mut self.agents[slot];
        agent.position = agent.position + agent.pending_move;
    }

    /// Exhaustive pair sampling: counts ordered pairs whose centers are
    /// closer than the tolerated fraction of their summed radii.
    fn record_conflicts(&mut self) {
        let tolerated = 1.0 - self.config.conflict_tolerance;
        let tolerated_sq = tolerated * tolerated;
        for (i, agent) in self.agents.iter().enumerate() {
            for (j, other) in self.agents.iter().enumerate() {
                if i == j {
                    continue;
                }
                self.pairs_checked += 1;
                let distance_sq = (agent.position - other.position).sqr_magnitude();
                let radius_sum = agent.radius + other.radius;
                if distance_sq < radius_sum * radius_sum * tolerated_sq {
                    self.conflicts += 1;
                }
            }
        }
    }
}

impl Default for Simulator {
    fn default() -> Self {
        Simulator::new(Config::default())
    }
}
