// src/model/fields.rs
//
// Name -> typed accessor table over `BillingDetail`. The merge engine and
// the exporter walk this instead of reflecting on field names.

use super::BillingDetail;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Currency amount, rounded to cents once final.
    Money,
    /// Physical quantity (kWh).
    Quantity,
    /// Whole number of days.
    Days,
    Text,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Number(f64),
    Integer(u32),
    Text(String),
}

impl FieldValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Number(v) => Some(*v),
            FieldValue::Integer(v) => Some(f64::from(*v)),
            FieldValue::Text(s) => super::parse_amount(s),
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            FieldValue::Integer(v) => Some(*v),
            FieldValue::Number(v) if *v >= 0.0 => Some(v.round() as u32),
            FieldValue::Number(_) => None,
            FieldValue::Text(s) => s.trim().parse().ok(),
        }
    }

    pub fn as_text(&self) -> String {
        match self {
            FieldValue::Text(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Number(v) => write!(f, "{v}"),
            FieldValue::Integer(v) => write!(f, "{v}"),
            FieldValue::Text(s) => f.write_str(s),
        }
    }
}

pub struct Field {
    pub name: &'static str,
    pub kind: FieldKind,
    getter: fn(&BillingDetail) -> Option<FieldValue>,
    setter: fn(&mut BillingDetail, &FieldValue) -> bool,
}

impl Field {
    pub fn get(&self, detail: &BillingDetail) -> Option<FieldValue> {
        (self.getter)(detail)
    }

    /// Store `value`, converting it to the field's type. Returns `false`
    /// (and leaves the field untouched) when the value does not convert.
    pub fn set(&self, detail: &mut BillingDetail, value: FieldValue) -> bool {
        (self.setter)(detail, &value)
    }
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish()
    }
}

macro_rules! detail_field {
    (number $name:ident, $kind:ident) => {
        Field {
            name: stringify!($name),
            kind: FieldKind::$kind,
            getter: |d| d.$name.map(FieldValue::Number),
            setter: |d, v| match v.as_f64() {
                Some(x) => {
                    d.$name = Some(x);
                    true
                }
                None => false,
            },
        }
    };
    (days $name:ident) => {
        Field {
            name: stringify!($name),
            kind: FieldKind::Days,
            getter: |d| d.$name.map(FieldValue::Integer),
            setter: |d, v| match v.as_u32() {
                Some(x) => {
                    d.$name = Some(x);
                    true
                }
                None => false,
            },
        }
    };
    (text $name:ident) => {
        Field {
            name: stringify!($name),
            kind: FieldKind::Text,
            getter: |d| d.$name.clone().map(FieldValue::Text),
            setter: |d, v| {
                d.$name = Some(v.as_text());
                true
            },
        }
    };
}

/// Every detail field, in export order.
pub static FIELDS: &[Field] = &[
    detail_field!(text billed_month),
    detail_field!(text tariff),
    detail_field!(text supply_address),
    detail_field!(number power_p1, Money),
    detail_field!(number power_p2, Money),
    detail_field!(number power_p3, Money),
    detail_field!(number power_p4, Money),
    detail_field!(number power_p5, Money),
    detail_field!(number power_p6, Money),
    detail_field!(number power_amount, Money),
    detail_field!(days days),
    detail_field!(number consumption_kwh_p1, Quantity),
    detail_field!(number consumption_kwh_p2, Quantity),
    detail_field!(number consumption_kwh_p3, Quantity),
    detail_field!(number consumption_kwh_p4, Quantity),
    detail_field!(number consumption_kwh_p5, Quantity),
    detail_field!(number consumption_kwh_p6, Quantity),
    detail_field!(number total_kwh, Quantity),
    detail_field!(number consumption_cost_p1, Money),
    detail_field!(number consumption_cost_p2, Money),
    detail_field!(number consumption_cost_p3, Money),
    detail_field!(number consumption_cost_p4, Money),
    detail_field!(number consumption_cost_p5, Money),
    detail_field!(number consumption_cost_p6, Money),
    detail_field!(number indexed_energy_p1, Money),
    detail_field!(number indexed_energy_p2, Money),
    detail_field!(number indexed_energy_p3, Money),
    detail_field!(number indexed_energy_p4, Money),
    detail_field!(number indexed_energy_p5, Money),
    detail_field!(number indexed_energy_p6, Money),
    detail_field!(number consumption_amount, Money),
    detail_field!(number social_bonus, Money),
    detail_field!(number electricity_tax, Money),
    detail_field!(number meter_rental, Money),
    detail_field!(number other_charges, Money),
    detail_field!(number excess_power_p1, Money),
    detail_field!(number excess_power_p2, Money),
    detail_field!(number excess_power_p3, Money),
    detail_field!(number excess_power_p4, Money),
    detail_field!(number excess_power_p5, Money),
    detail_field!(number excess_power_p6, Money),
    detail_field!(number excess_power_amount, Money),
    detail_field!(number reactive_amount, Money),
    detail_field!(number taxable_base, Money),
    detail_field!(number invoiced_amount, Money),
    detail_field!(text due_date),
    detail_field!(number total_amount, Money),
    detail_field!(text settlement_date),
    detail_field!(number power_toll, Money),
    detail_field!(number power_charges, Money),
    detail_field!(number energy_toll, Money),
    detail_field!(number energy_charges, Money),
    detail_field!(number atr_amount, Money),
];

/// Look a field up by its schema name.
pub fn field(name: &str) -> Option<&'static Field> {
    FIELDS.iter().find(|f| f.name == name)
}
