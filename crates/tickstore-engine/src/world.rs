//! A miniature world: creatures wander on a torus and take damage, items sit
//! still. Each entity is persisted as one JSON record.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tickstore_db::{RecordId, RecordTypeId, StoredRecord};
use tracing::warn;

/// Side length of the square world.
const WORLD_SIZE: i32 = 64;

/// Hit points of a newly spawned creature.
const MAX_HP: u32 = 100;

/// Kind of entity, mapped to a record type in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Moves and loses hit points.
    Creature,
    /// Never changes.
    Item,
}

impl EntityKind {
    /// Record type the kind is stored under.
    pub const fn record_type(self) -> RecordTypeId {
        match self {
            Self::Creature => RecordTypeId(1),
            Self::Item => RecordTypeId(2),
        }
    }
}

/// One persisted entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    /// Identifier, unique within the kind.
    pub id: i64,
    /// Kind of entity.
    pub kind: EntityKind,
    /// Column.
    pub x: i32,
    /// Row.
    pub y: i32,
    /// Hit points; a creature at zero respawns at full health.
    pub hp: u32,
}

impl Entity {
    /// Store key of this entity.
    pub const fn record_id(&self) -> RecordId {
        RecordId(self.id)
    }
}

/// All entities plus the random source driving them.
pub struct World {
    entities: Vec<Entity>,
    rng: StdRng,
}

impl World {
    /// A fresh world of `count` entities; every fourth one is an item.
    pub fn seed(count: u32, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let entities = (0..count)
            .map(|n| {
                let kind = if n.checked_rem(4) == Some(3) {
                    EntityKind::Item
                } else {
                    EntityKind::Creature
                };
                Entity {
                    id: i64::from(n),
                    kind,
                    x: rng.random_range(0..WORLD_SIZE),
                    y: rng.random_range(0..WORLD_SIZE),
                    hp: MAX_HP,
                }
            })
            .collect();
        Self { entities, rng }
    }

    /// Rebuild a world from the store's live snapshot. Records that do not
    /// decode are skipped.
    pub fn restore(records: &[StoredRecord], seed: u64) -> Self {
        let entities = records
            .iter()
            .filter_map(|record| match serde_json::from_slice::<Entity>(&record.payload) {
                Ok(entity) => Some(entity),
                Err(e) => {
                    warn!(
                        record_id = %record.record_id,
                        record_type_id = %record.record_type_id,
                        error = %e,
                        "skipping undecodable entity"
                    );
                    None
                }
            })
            .collect();
        Self {
            entities,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Every entity.
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    /// Whether the world has no entities.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Advance one tick and return the entities that changed.
    pub fn step(&mut self) -> Vec<Entity> {
        let mut changed = Vec::new();
        for entity in &mut self.entities {
            if entity.kind == EntityKind::Item {
                continue;
            }
            let dx: i32 = self.rng.random_range(-1..=1);
            let dy: i32 = self.rng.random_range(-1..=1);
            let damage: u32 = self.rng.random_range(0..=2);
            if dx == 0 && dy == 0 && damage == 0 {
                continue;
            }

            entity.x = entity.x.wrapping_add(dx).rem_euclid(WORLD_SIZE);
            entity.y = entity.y.wrapping_add(dy).rem_euclid(WORLD_SIZE);
            entity.hp = match entity.hp.saturating_sub(damage) {
                0 => MAX_HP,
                hp => hp,
            };
            changed.push(entity.clone());
        }
        changed
    }
}
