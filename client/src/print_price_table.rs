use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Color, Table};

use crate::PriceResult;

pub fn price_table(query: &str, result: &PriceResult) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Symbol"),
            Cell::new("Query"),
            Cell::new("Value").fg(Color::Green),
        ]);

    table.add_row(vec![
        result.symbol.clone(),
        query.to_string(),
        result.value.clone(),
    ]);

    table
}

pub fn print_price_as_table(query: &str, result: &PriceResult) {
    println!("{}", price_table(query, result));
}
