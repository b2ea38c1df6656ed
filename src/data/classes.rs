/// FloodNet class table
use serde::{Deserialize, Serialize};

/// Semantic classes of the FloodNet dataset, indexed by label value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FloodNetClass {
    Background = 0,
    BuildingFlooded = 1,
    BuildingNonFlooded = 2,
    RoadFlooded = 3,
    RoadNonFlooded = 4,
    Water = 5,
    Tree = 6,
    Vehicle = 7,
    Pool = 8,
    Grass = 9,
}

impl FloodNetClass {
    pub const ALL: [FloodNetClass; 10] = [
        FloodNetClass::Background,
        FloodNetClass::BuildingFlooded,
        FloodNetClass::BuildingNonFlooded,
        FloodNetClass::RoadFlooded,
        FloodNetClass::RoadNonFlooded,
        FloodNetClass::Water,
        FloodNetClass::Tree,
        FloodNetClass::Vehicle,
        FloodNetClass::Pool,
        FloodNetClass::Grass,
    ];

    pub fn from_id(id: usize) -> Option<Self> {
        Self::ALL.get(id).copied()
    }

    pub fn id(self) -> usize {
        self as usize
    }

    /// Human-readable name
    pub fn name(self) -> &'static str {
        match self {
            FloodNetClass::Background => "Background",
            FloodNetClass::BuildingFlooded => "Building Flooded",
            FloodNetClass::BuildingNonFlooded => "Building Non-Flooded",
            FloodNetClass::RoadFlooded => "Road Flooded",
            FloodNetClass::RoadNonFlooded => "Road Non-Flooded",
            FloodNetClass::Water => "Water",
            FloodNetClass::Tree => "Tree",
            FloodNetClass::Vehicle => "Vehicle",
            FloodNetClass::Pool => "Pool",
            FloodNetClass::Grass => "Grass",
        }
    }

    /// Display label for any class ID, FloodNet or not
    pub fn label(id: usize) -> String {
        match Self::from_id(id) {
            Some(class) => class.name().to_string(),
            None => format!("Class {}", id),
        }
    }
}
