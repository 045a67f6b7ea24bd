//! Typed payloads for the GymDesk REST API.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use gym_core::{GymError, Role};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Card,
    Cash,
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentMethod::Card => f.write_str("card"),
            PaymentMethod::Cash => f.write_str("cash"),
        }
    }
}

impl FromStr for PaymentMethod {
    type Err = GymError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "card" => Ok(PaymentMethod::Card),
            "cash" => Ok(PaymentMethod::Cash),
            other => Err(GymError::Protocol(format!(
                "Unknown payment method '{other}' (expected card or cash)"
            ))),
        }
    }
}

/// Entry of the user list and of roster snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub phone_number: String,
    #[serde(default)]
    pub date_of_birth: Option<NaiveDate>,
    #[serde(default)]
    pub gender: Option<Gender>,
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

impl User {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewUser {
    pub first_name: String,
    pub last_name: String,
    pub phone_number: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_of_birth: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gender: Option<Gender>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UserUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanSummary {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    pub price: i64,
    pub duration_days: i64,
    #[serde(default)]
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionInfo {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default)]
    pub days_left: Option<i64>,
    pub plan: PlanSummary,
}

/// Single-user view including subscription history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserDetail {
    pub first_name: String,
    pub last_name: String,
    pub phone_number: String,
    #[serde(default)]
    pub date_of_birth: Option<NaiveDate>,
    #[serde(default)]
    pub gender: Option<Gender>,
    #[serde(default)]
    pub subscriptions: Vec<SubscriptionInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GymAdmin {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub phone_number: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gym {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub admin: Option<GymAdmin>,
}

/// A gym together with the admin account that manages it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewGym {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    pub user: NewUser,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub id: Uuid,
    pub name: String,
    pub price: i64,
    pub duration_days: i64,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct NewPlan<'a> {
    pub name: &'a str,
    pub price: i64,
    pub duration_days: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct SubscriptionAssignment {
    pub user_id: Uuid,
    pub plan_id: Uuid,
    pub payment_method: PaymentMethod,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct DailySubscription {
    pub user_id: Uuid,
    pub amount: i64,
    pub payment_method: PaymentMethod,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub image_path: Option<String>,
    pub selling_price: i64,
    pub purchase_price: i64,
    pub total_amount: i64,
    pub current_amount: i64,
    #[serde(default)]
    pub supplier_name: Option<String>,
    pub created_at: NaiveDate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewProduct {
    pub name: String,
    pub selling_price: i64,
    pub purchase_price: i64,
    pub total_amount: i64,
    pub supplier_name: Option<String>,
}

impl NewProduct {
    pub(crate) fn into_form(self) -> Vec<(String, String)> {
        let mut fields = vec![
            ("name".to_string(), self.name),
            ("selling_price".to_string(), self.selling_price.to_string()),
            ("purchase_price".to_string(), self.purchase_price.to_string()),
            ("total_amount".to_string(), self.total_amount.to_string()),
        ];
        if let Some(supplier) = self.supplier_name.filter(|s| !s.is_empty()) {
            fields.push(("supplier_name".to_string(), supplier));
        }
        fields
    }
}

/// Partial product update; only the fields that are set are sent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProductUpdate {
    pub name: Option<String>,
    pub selling_price: Option<i64>,
    pub purchase_price: Option<i64>,
    pub total_amount: Option<i64>,
    pub current_amount: Option<i64>,
    pub supplier_name: Option<String>,
}

impl ProductUpdate {
    pub(crate) fn into_form(self) -> Vec<(String, String)> {
        let numbers = [
            ("selling_price", self.selling_price),
            ("purchase_price", self.purchase_price),
            ("total_amount", self.total_amount),
            ("current_amount", self.current_amount),
        ];

        let mut fields = Vec::new();
        if let Some(name) = self.name {
            fields.push(("name".to_string(), name));
        }
        for (key, value) in numbers {
            if let Some(v) = value {
                fields.push((key.to_string(), v.to_string()));
            }
        }
        if let Some(supplier) = self.supplier_name {
            fields.push(("supplier_name".to_string(), supplier));
        }
        fields
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct SaleRequest {
    pub product_id: Uuid,
    pub quantity: i64,
    pub payment_method: PaymentMethod,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sale {
    pub id: Uuid,
    pub quantity: i64,
    pub total_price: i64,
    pub sale_date: NaiveDate,
    pub payment_method: String,
    pub product_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketStatus {
    pub marketplace_enabled: bool,
}

/// `{"message": "..."}` acknowledgement returned by mutations.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub(crate) struct Acknowledgement {
    #[serde(default)]
    pub message: String,
}
