use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Billable tenant holding a credit balance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    pub credit_balance: BigDecimal,
    pub auto_top_up_enabled: bool,
    pub credit_threshold: BigDecimal,
    pub auto_top_up_amount: BigDecimal,
    pub payment_customer_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Organization {
    pub fn new(name: impl Into<String>, credit_balance: BigDecimal) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            credit_balance,
            auto_top_up_enabled: false,
            credit_threshold: BigDecimal::from(0),
            auto_top_up_amount: BigDecimal::from(0),
            payment_customer_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_auto_top_up(
        mut self,
        threshold: BigDecimal,
        amount: BigDecimal,
        customer_id: impl Into<String>,
    ) -> Self {
        self.auto_top_up_enabled = true;
        self.credit_threshold = threshold;
        self.auto_top_up_amount = amount;
        self.payment_customer_id = Some(customer_id.into());
        self
    }

    /// True when settings and balance call for an automatic purchase.
    pub fn needs_auto_top_up(&self) -> bool {
        let zero = BigDecimal::from(0);
        self.auto_top_up_enabled
            && self.auto_top_up_amount > zero
            && self.credit_balance < self.credit_threshold
    }
}
