//! Basic usage example for `BandedMap`.
//!
//! This example demonstrates adding, updating and removing entries, and shows how the map
//! grows by whole generations once the bands for a key are exhausted.

use std::num::NonZero;

use banded_map::BandedMap;

fn main() {
    let mut map = BandedMap::new(NonZero::new(4).unwrap());

    println!(
        "Created BandedMap with {} slots in {} generation",
        map.capacity(),
        map.generations()
    );

    for (name, value) in [("red", 0xFF0000), ("green", 0x00FF00), ("blue", 0x0000FF)] {
        map.add(name, value);
        println!(
            "Added {name:<6} -> {value:#08x}, capacity {} in {} generations",
            map.capacity(),
            map.generations()
        );
    }

    for (name, value) in [("white", 0xFFFFFF), ("black", 0x000000), ("grey", 0x808080)] {
        map.add(name, value);
        println!(
            "Added {name:<6} -> {value:#08x}, capacity {} in {} generations",
            map.capacity(),
            map.generations()
        );
    }

    let previous = map.add_or_update("grey", 0x7F7F7F);
    println!("Updated grey, previous value {previous:#08x?}");

    if let Some(value) = map.remove("black") {
        println!("Removed black ({value:#08x})");
    }

    println!("Entries in slot order:");
    for (name, value) in &map {
        println!("  {name:<6} {value:#08x}");
    }

    println!("Contains red: {}", map.contains_key("red"));
    println!("Contains black: {}", map.contains_key("black"));
}
