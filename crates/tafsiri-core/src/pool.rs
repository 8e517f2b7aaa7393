//! Three-tier engine cache.
//!
//! Partitions every registered engine into HOT, WARM and COLD queues so
//! the number of fully resident models stays bounded regardless of catalog
//! size. HOT and WARM have hard capacity ceilings; COLD is unbounded.
//! Eviction is tier-local LRU with WARM acting as a demotion buffer, not a
//! single global LRU. Tier bookkeeping is pure in-memory work and never
//! performs I/O.

use std::collections::{HashMap, VecDeque};

use tracing::debug;

use crate::backend::BackendFactory;
use crate::config::EngineConfig;
use crate::direction::Direction;
use crate::engine::{Engine, Readiness};
use crate::error::{Error, Result};
use crate::registry::CheckpointRegistry;

/// Tier occupancy snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub hot: usize,
    pub warm: usize,
    pub cold: usize,
}

/// Owns all engines. Each direction key lives in exactly one tier queue;
/// the queues hold keys only, with a side map to the engines themselves.
pub struct EnginePool {
    hot: VecDeque<Direction>,
    warm: VecDeque<Direction>,
    cold: VecDeque<Direction>,
    engines: HashMap<Direction, Engine>,
    hot_capacity: usize,
    warm_capacity: usize,
}

impl EnginePool {
    /// Build one engine per registered direction and assign initial tiers
    /// by declaration order: the first `hot_capacity` directions start HOT,
    /// the next `warm_capacity` WARM, the remainder COLD. HOT and WARM
    /// sessions are materialized here; a load failure aborts the build.
    pub fn build(
        registry: &CheckpointRegistry,
        config: &EngineConfig,
        factory: &dyn BackendFactory,
    ) -> Result<Self> {
        config.validate()?;

        let mut pool = Self {
            hot: VecDeque::new(),
            warm: VecDeque::new(),
            cold: VecDeque::new(),
            engines: HashMap::with_capacity(registry.len()),
            hot_capacity: config.hot_capacity,
            warm_capacity: config.warm_capacity,
        };

        for (index, direction) in registry.directions().iter().enumerate() {
            let checkpoint = registry.load(direction)?;
            let readiness = if index < pool.hot_capacity {
                Readiness::Hot
            } else if index < pool.hot_capacity + pool.warm_capacity {
                Readiness::Warm
            } else {
                Readiness::Cold
            };

            let mut engine = Engine::new(direction.clone(), checkpoint, readiness);
            if readiness != Readiness::Cold {
                engine.ensure_open(factory)?;
            }

            // Earlier declarations sit closer to the tail, mirroring the
            // order promotions would have produced.
            match readiness {
                Readiness::Hot => pool.hot.push_front(direction.clone()),
                Readiness::Warm => pool.warm.push_front(direction.clone()),
                Readiness::Cold => pool.cold.push_front(direction.clone()),
            }
            pool.engines.insert(direction.clone(), engine);
        }

        debug!("Engine pool built: {:?}", pool.stats());
        Ok(pool)
    }

    /// Resolve a direction to its engine, promoting it to HOT.
    ///
    /// Fails only for unknown directions. A repeat hit on an engine that is
    /// already HOT returns it unchanged, without reordering the tier.
    pub fn get(&mut self, direction: &Direction) -> Result<&mut Engine> {
        let key = self.resolve(direction)?;
        if !self.hot.contains(&key) {
            self.promote(&key);
        }
        self.engines
            .get_mut(&key)
            .ok_or_else(|| Error::UnsupportedLanguage(key.to_string()))
    }

    /// Current readiness of a direction's engine, if registered.
    pub fn readiness(&self, direction: &Direction) -> Option<Readiness> {
        let key = self.resolve(direction).ok()?;
        self.engines.get(&key).map(Engine::readiness)
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            hot: self.hot.len(),
            warm: self.warm.len(),
            cold: self.cold.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }

    fn resolve(&self, direction: &Direction) -> Result<Direction> {
        if self.engines.contains_key(direction) {
            return Ok(direction.clone());
        }
        if direction.variant().is_some() {
            let bare = direction.without_variant();
            if self.engines.contains_key(&bare) {
                return Ok(bare);
            }
        }
        Err(Error::UnsupportedLanguage(direction.to_string()))
    }

    /// Move a non-HOT engine to the head of HOT, cascading demotions:
    /// when HOT is full its least-recently-promoted member drops into
    /// WARM, and when WARM is full its longest-resident member drops into
    /// COLD first.
    fn promote(&mut self, key: &Direction) {
        self.warm.retain(|d| d != key);
        self.cold.retain(|d| d != key);

        if self.hot.len() >= self.hot_capacity {
            if self.warm.len() >= self.warm_capacity {
                self.spill_warm_tail();
            }
            if let Some(demoted) = self.hot.pop_back() {
                debug!("Demoting {} HOT -> WARM", demoted);
                if let Some(engine) = self.engines.get_mut(&demoted) {
                    engine.set_readiness(Readiness::Warm);
                }
                self.warm.push_front(demoted);
            }
            // a zero-capacity WARM buffer spills straight through to COLD
            while self.warm.len() > self.warm_capacity {
                self.spill_warm_tail();
            }
        }

        debug!("Promoting {} to HOT", key);
        self.hot.push_front(key.clone());
        if let Some(engine) = self.engines.get_mut(key) {
            engine.set_readiness(Readiness::Hot);
        }
    }

    fn spill_warm_tail(&mut self) {
        if let Some(dropped) = self.warm.pop_back() {
            debug!("Demoting {} WARM -> COLD", dropped);
            if let Some(engine) = self.engines.get_mut(&dropped) {
                engine.set_readiness(Readiness::Cold);
                engine.release();
            }
            self.cold.push_front(dropped);
        }
    }
}
