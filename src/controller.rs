use std::fmt;

use serde::Serialize;
use serde_json::{json, Value};
use tokio::time::{sleep, Instant};

use crate::cli::Action;
use crate::client::ServiceManagerClient;
use crate::config::{Config, WaitConfig};
use crate::error::ControlError;
use crate::observability::Logger;
use crate::protocol::{InstanceParameters, StoppedFlag};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InstanceState {
    Running,
    Stopped,
    Unknown,
}

impl InstanceState {
    pub fn from_service_stopped(service_stopped: Option<bool>) -> Self {
        match service_stopped {
            Some(true) => InstanceState::Stopped,
            Some(false) => InstanceState::Running,
            None => InstanceState::Unknown,
        }
    }

    pub fn from_flag(flag: StoppedFlag) -> Self {
        match flag {
            StoppedFlag::Set(stopped) => Self::from_service_stopped(Some(stopped)),
            StoppedFlag::Missing | StoppedFlag::Malformed => InstanceState::Unknown,
        }
    }

    pub fn from_parameters(params: &InstanceParameters) -> Self {
        Self::from_flag(params.stopped_flag())
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InstanceState::Running => "RUNNING",
            InstanceState::Stopped => "STOPPED",
            InstanceState::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Decision {
    /// `status`: nothing to change.
    Report,
    /// An operation is already running on the instance.
    Skip { operation: String },
    AlreadyInState { state: InstanceState },
    Patch { service_stopped: bool },
}

/// The in-flight guard wins over every action, `status` included.
/// Autostart acts on a missing flag but leaves a malformed one alone.
pub fn decide(action: Action, flag: StoppedFlag, requested_operation: Option<&str>) -> Decision {
    if let Some(op) = requested_operation {
        return Decision::Skip {
            operation: op.to_string(),
        };
    }

    let state = InstanceState::from_flag(flag);
    match (action, state) {
        (Action::Status, _) => Decision::Report,
        (Action::Start, InstanceState::Running) => Decision::AlreadyInState { state },
        (Action::Start, _) => Decision::Patch {
            service_stopped: false,
        },
        (Action::Stop, InstanceState::Stopped) => Decision::AlreadyInState { state },
        (Action::Stop, _) => Decision::Patch {
            service_stopped: true,
        },
        (Action::Autostart, _) => match flag {
            StoppedFlag::Set(true) | StoppedFlag::Missing => Decision::Patch {
                service_stopped: false,
            },
            StoppedFlag::Set(false) | StoppedFlag::Malformed => Decision::AlreadyInState { state },
        },
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Outcome {
    pub action: Action,
    pub instance_name: String,
    pub instance_id: String,
    #[serde(rename = "serviceStopped")]
    pub service_stopped: Value,
    #[serde(rename = "requestedOperation")]
    pub requested_operation: Value,
    pub state: InstanceState,
    pub decision: Decision,
    pub dry_run: bool,
    /// PATCH sent and accepted by the API.
    pub applied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_state: Option<InstanceState>,
}

pub struct Controller {
    client: ServiceManagerClient,
    config: Config,
    logger: Logger,
}

impl Controller {
    pub fn new(config: Config, logger: Logger) -> Result<Self, ControlError> {
        let client = ServiceManagerClient::new(&config, logger.clone())?;
        Ok(Self {
            client,
            config,
            logger,
        })
    }

    pub async fn run(&self, action: Action) -> Result<Outcome, ControlError> {
        let mut token = self.client.fetch_token().await?;
        let instance = self
            .client
            .find_instance(&token, &self.config.instance_name)
            .await?;
        self.logger.info(
            "Instance resolved",
            Some(&json!({"instance_name": self.config.instance_name, "instance_id": instance.id})),
        );

        let mut params = self.client.instance_parameters(&token, &instance.id).await?;

        if let (Some(wait), Some(op)) = (self.config.wait, params.requested_operation()) {
            self.logger.info(
                "Waiting for in-flight operation to finish",
                Some(&json!({"instance_id": instance.id, "operation": op})),
            );
            params = self
                .wait_until(&mut token, &instance.id, wait, "no operation in flight", |p| {
                    p.requested_operation().is_none()
                })
                .await?;
        }

        let state = InstanceState::from_parameters(&params);
        let requested_operation = params.requested_operation();
        let decision = decide(action, params.stopped_flag(), requested_operation.as_deref());
        self.logger.info(
            "Decision made",
            Some(&json!({
                "action": action.to_string(),
                "state": state.to_string(),
                "decision": decision,
            })),
        );

        let mut outcome = Outcome {
            action,
            instance_name: self.config.instance_name.clone(),
            instance_id: instance.id.clone(),
            service_stopped: params.raw_service_stopped(),
            requested_operation: params.raw_requested_operation(),
            state,
            decision: decision.clone(),
            dry_run: self.config.dry_run,
            applied: false,
            final_state: None,
        };

        let Decision::Patch { service_stopped } = decision else {
            return Ok(outcome);
        };
        if self.config.dry_run {
            self.logger.info("Dry run, instance left unchanged", None);
            return Ok(outcome);
        }

        self.client
            .set_service_stopped(&token, &instance.id, service_stopped)
            .await?;
        outcome.applied = true;
        self.logger.info(
            "State change accepted",
            Some(&json!({"instance_id": instance.id, "serviceStopped": service_stopped})),
        );

        if let Some(wait) = self.config.wait {
            let target = InstanceState::from_service_stopped(Some(service_stopped));
            let reached = self
                .wait_until(&mut token, &instance.id, wait, &target.to_string(), |p| {
                    p.requested_operation().is_none() && InstanceState::from_parameters(p) == target
                })
                .await?;
            outcome.final_state = Some(InstanceState::from_parameters(&reached));
        }

        Ok(outcome)
    }

    /// Polls the parameters endpoint until `done` holds or the wait times out.
    /// A 401 mid-wait means the token expired; it is refreshed once per poll.
    async fn wait_until<F>(
        &self,
        token: &mut String,
        instance_id: &str,
        wait: WaitConfig,
        target: &str,
        done: F,
    ) -> Result<InstanceParameters, ControlError>
    where
        F: Fn(&InstanceParameters) -> bool,
    {
        let started = Instant::now();
        let deadline = started + wait.timeout;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Err(ControlError::WaitTimeout {
                    target: target.to_string(),
                    waited_secs: started.elapsed().as_secs(),
                });
            }
            sleep(wait.poll_interval.min(deadline - now)).await;

            let polled = self.client.instance_parameters(token.as_str(), instance_id).await;
            let params = match polled {
                Err(ControlError::Status { status, .. }) if status.as_u16() == 401 => {
                    self.logger.info("Token rejected while waiting, refreshing", None);
                    *token = self.client.fetch_token().await?;
                    self.client.instance_parameters(token.as_str(), instance_id).await?
                }
                other => other?,
            };
            self.logger.debug(
                "Polled instance state",
                Some(&json!({
                    "state": InstanceState::from_parameters(&params).to_string(),
                    "requestedOperation": params.raw_requested_operation(),
                })),
            );
            if done(&params) {
                return Ok(params);
            }
        }
    }
}
