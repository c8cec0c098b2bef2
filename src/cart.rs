use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::validate::{self, FormErrors};

pub const MAX_QUANTITY: u32 = 1000;
pub const MAX_UNIT_PRICE: f64 = 100_000.0;
pub const MAX_ROWS: usize = 50;
pub const MAX_CART_ITEMS: usize = 100;

/// One billable row in the session cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub description: String,
    pub quantity: u32,
    pub unit_price_cents: i64,
}

/// A row as typed into the line-item table, before validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineItemInput {
    pub description: String,
    pub quantity: String,
    pub unit_price: String,
}

impl LineItem {
    pub fn total_cents(&self) -> i64 {
        self.unit_price_cents * i64::from(self.quantity)
    }
}

impl LineItemInput {
    pub fn is_blank(&self) -> bool {
        self.description.trim().is_empty() && self.unit_price.trim().is_empty()
    }

    /// Validate the row; errors are keyed `{prefix}[description]` etc.
    pub fn parse(&self, prefix: &str) -> Result<LineItem, FormErrors> {
        let description = self.description.trim();
        let quantity = self.quantity.trim();
        let unit_price = self.unit_price.trim();

        let mut errors = FormErrors::new();
        errors.check(
            &format!("{prefix}[description]"),
            validate::validate_required("Description", description)
                .and_then(|()| validate::validate_length("Description", description, 2, 200)),
        );
        errors.check(
            &format!("{prefix}[quantity]"),
            validate::validate_range("Quantity", quantity, 1, MAX_QUANTITY),
        );
        errors.check(
            &format!("{prefix}[unit_price]"),
            validate::validate_range("Unit price", unit_price, 0.0, MAX_UNIT_PRICE),
        );

        match (quantity.parse::<u32>(), unit_price.parse::<f64>()) {
            (Ok(quantity), Ok(unit_price)) if errors.is_empty() => Ok(LineItem {
                description: description.into(),
                quantity,
                unit_price_cents: (unit_price * 100.0).round() as i64,
            }),
            _ => Err(errors),
        }
    }
}

/// Collect `{name}[i][field]` entries from a submitted form, ordered by `i`.
pub fn inputs_from_form(form: &HashMap<String, String>, name: &str) -> Vec<LineItemInput> {
    let mut rows: BTreeMap<usize, LineItemInput> = BTreeMap::new();

    for (key, value) in form {
        let Some(rest) = key
            .strip_prefix(name)
            .and_then(|r| r.strip_prefix('['))
        else {
            continue;
        };
        let Some((index, field)) = rest.split_once("][") else {
            continue;
        };
        let (Ok(index), Some(field)) = (index.parse::<usize>(), field.strip_suffix(']')) else {
            continue;
        };
        if index >= MAX_ROWS {
            continue;
        }

        let row = rows.entry(index).or_default();
        match field {
            "description" => row.description = value.clone(),
            "quantity" => row.quantity = value.clone(),
            "unit_price" => row.unit_price = value.clone(),
            _ => {}
        }
    }

    rows.into_values().collect()
}

/// Validate every non-blank row; all rows must pass for any to be accepted.
pub fn parse_rows(name: &str, rows: &[LineItemInput]) -> Result<Vec<LineItem>, FormErrors> {
    let mut items = vec![];
    let mut errors = FormErrors::new();

    for (i, row) in rows.iter().enumerate() {
        if row.is_blank() {
            continue;
        }
        match row.parse(&format!("{name}[{i}]")) {
            Ok(item) => items.push(item),
            Err(row_errors) => {
                for (field, message) in row_errors.iter() {
                    errors.add(field, message);
                }
            }
        }
    }

    if items.is_empty() && errors.is_empty() {
        errors.add(name, "Add at least one line item");
    }

    if errors.is_empty() {
        Ok(items)
    } else {
        Err(errors)
    }
}

pub fn total_cents(items: &[LineItem]) -> i64 {
    items.iter().map(LineItem::total_cents).sum()
}

/// "$1,234.50"
pub fn format_money(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let cents = cents.unsigned_abs();
    let dollars = (cents / 100).to_string();

    let mut grouped = String::with_capacity(dollars.len() + dollars.len() / 3);
    for (i, ch) in dollars.chars().enumerate() {
        if i > 0 && (dollars.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    format!("{sign}${grouped}.{:02}", cents % 100)
}

/// Whether `adding` more items still fit in a cart already holding `held`.
pub fn validate_cart_size(held: usize, adding: usize) -> validate::Validation {
    if held.saturating_add(adding) > MAX_CART_ITEMS {
        let room = MAX_CART_ITEMS.saturating_sub(held);
        return Err(validate::ValidationError::new(format!(
            "Your cart can hold at most {MAX_CART_ITEMS} items ({room} more)"
        )));
    }
    Ok(())
}
