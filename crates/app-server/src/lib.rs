pub mod wager_service;

#[cfg(test)]
mod integration_flows;
