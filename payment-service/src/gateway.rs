//! Mock payment gateway. Outcomes are keyed off the amount so test flows
//! are reproducible: amounts ending in 99 decline, amounts ending in 98
//! time out, everything else is approved after a bounded random delay.

use std::time::Duration;

use rand::Rng;
use tokio::time;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayOutcome {
    Approved,
    Declined,
    Timeout,
}

#[derive(Debug, Clone)]
pub struct GatewayResult {
    pub outcome: GatewayOutcome,
    pub authorization_code: Option<String>,
    pub failure_reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MockPaymentGateway {
    min_delay_ms: u64,
    max_delay_ms: u64,
}

impl MockPaymentGateway {
    pub fn new(min_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            min_delay_ms,
            max_delay_ms,
        }
    }

    pub async fn authorize(&self, amount: i32) -> GatewayResult {
        let bounded_max = self.max_delay_ms.max(self.min_delay_ms);
        let delay = rand::thread_rng().gen_range(self.min_delay_ms..=bounded_max);
        time::sleep(Duration::from_millis(delay)).await;

        match decide(amount) {
            GatewayOutcome::Approved => GatewayResult {
                outcome: GatewayOutcome::Approved,
                authorization_code: Some(generate_authorization_code()),
                failure_reason: None,
            },
            GatewayOutcome::Declined => GatewayResult {
                outcome: GatewayOutcome::Declined,
                authorization_code: None,
                failure_reason: Some("DECLINED_BY_ISSUER".to_owned()),
            },
            GatewayOutcome::Timeout => {
                time::sleep(Duration::from_millis(800)).await;
                GatewayResult {
                    outcome: GatewayOutcome::Timeout,
                    authorization_code: None,
                    failure_reason: Some("GATEWAY_TIMEOUT".to_owned()),
                }
            }
        }
    }
}

pub fn decide(amount: i32) -> GatewayOutcome {
    match amount.rem_euclid(100) {
        99 => GatewayOutcome::Declined,
        98 => GatewayOutcome::Timeout,
        _ => GatewayOutcome::Approved,
    }
}

fn generate_authorization_code() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("AUTH-{}", hex[..10].to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amounts_ending_in_99_are_declined() {
        assert_eq!(decide(99), GatewayOutcome::Declined);
        assert_eq!(decide(199), GatewayOutcome::Declined);
        assert_eq!(decide(10_099), GatewayOutcome::Declined);
    }

    #[test]
    fn amounts_ending_in_98_time_out() {
        assert_eq!(decide(98), GatewayOutcome::Timeout);
        assert_eq!(decide(5_398), GatewayOutcome::Timeout);
    }

    #[test]
    fn other_amounts_are_approved() {
        assert_eq!(decide(100), GatewayOutcome::Approved);
        assert_eq!(decide(1), GatewayOutcome::Approved);
        assert_eq!(decide(25_000), GatewayOutcome::Approved);
    }

    #[test]
    fn authorization_codes_are_prefixed_and_short() {
        let code = generate_authorization_code();
        assert!(code.starts_with("AUTH-"));
        assert_eq!(code.len(), 15);
    }
}
