use super::error::FleetError;
use super::liveness::{classify_liveness, Liveness, LivenessThresholds};
use super::slots::{SlotAllocation, SlotMap};
use crate::shared::ids::{AgentId, AssignmentId, NodeId};
use crate::shared::logging::{append_log_event, LogLevel};
use crate::shared::time::now_millis;
use crate::store::{AgentHeartbeat, AgentRecord, JobStore};
use serde::Serialize;
use std::path::PathBuf;

/// Hardware seen by a discovery pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    pub fingerprint: String,
    pub serial: String,
    pub model: Option<String>,
    pub responsive: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    Registered(AgentRecord),
    Refreshed(AgentRecord),
    PoolExhausted { fingerprint: String },
}

impl HeartbeatOutcome {
    pub fn agent(&self) -> Option<&AgentRecord> {
        match self {
            HeartbeatOutcome::Registered(agent) | HeartbeatOutcome::Refreshed(agent) => {
                Some(agent)
            }
            HeartbeatOutcome::PoolExhausted { .. } => None,
        }
    }
}

/// Result of an operator releasing an agent's slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Released { agent_id: AgentId, slot: Option<u32> },
    Busy { assignment_id: Option<AssignmentId> },
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub registered: Vec<AgentId>,
    pub refreshed: Vec<AgentId>,
    pub exhausted: Vec<String>,
    pub marked_unresponsive: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentStatus {
    #[serde(flatten)]
    pub agent: AgentRecord,
    pub liveness: Liveness,
}

/// Registers this node's devices and answers liveness questions about the whole fleet.
#[derive(Debug, Clone)]
pub struct FleetRegistry {
    store: JobStore,
    slots: SlotMap,
    node_id: NodeId,
    thresholds: LivenessThresholds,
    log_path: Option<PathBuf>,
}

impl FleetRegistry {
    pub fn new(
        store: JobStore,
        slots: SlotMap,
        node_id: NodeId,
        thresholds: LivenessThresholds,
    ) -> Self {
        Self {
            store,
            slots,
            node_id,
            thresholds,
            log_path: None,
        }
    }

    pub fn with_log_path(mut self, path: PathBuf) -> Self {
        self.log_path = Some(path);
        self
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn thresholds(&self) -> &LivenessThresholds {
        &self.thresholds
    }

    /// Refreshes a known device or registers a new one under a freshly allocated slot.
    /// A known fingerprint keeps its agent id across reconnects.
    pub fn heartbeat(&self, device: &DiscoveredDevice) -> Result<HeartbeatOutcome, FleetError> {
        let (agent_id, slot, allocated) = match self.store.agent_by_fingerprint(&device.fingerprint)? {
            Some(known) => (known.agent_id, known.slot, false),
            None => match self.slots.allocate(&device.fingerprint)? {
                SlotAllocation::Exhausted => {
                    return Ok(HeartbeatOutcome::PoolExhausted {
                        fingerprint: device.fingerprint.clone(),
                    })
                }
                SlotAllocation::Existing(slot) => (AgentId::for_slot(&self.node_id, slot), slot, false),
                SlotAllocation::Allocated(slot) => (AgentId::for_slot(&self.node_id, slot), slot, true),
            },
        };

        let heartbeat = AgentHeartbeat {
            agent_id: agent_id.clone(),
            node_id: self.node_id.clone(),
            fingerprint: device.fingerprint.clone(),
            serial: device.serial.clone(),
            model: device.model.clone(),
            slot,
            responsive: device.responsive,
            observed_at: now_millis(),
        };
        let created = match self.store.record_heartbeat(&heartbeat) {
            Ok(created) => created,
            Err(err) => {
                if allocated {
                    if let Err(release_err) = self.slots.release(&device.fingerprint) {
                        self.log(
                            LogLevel::Warn,
                            "fleet.slot_release_failed",
                            &release_err.to_string(),
                            crate::log_fields! {
                                "agent_id" => agent_id.as_str(),
                                "fingerprint" => device.fingerprint.as_str(),
                            },
                        );
                    }
                }
                return Err(err.into());
            }
        };

        let Some(agent) = self.store.get_agent(&agent_id)? else {
            return Err(FleetError::AgentMissing {
                agent_id: agent_id.to_string(),
            });
        };
        Ok(if created {
            HeartbeatOutcome::Registered(agent)
        } else {
            HeartbeatOutcome::Refreshed(agent)
        })
    }

    /// Heartbeats every discovered device, then flags this node's missing agents.
    pub fn sync_discovery(&self, devices: &[DiscoveredDevice]) -> Result<SyncReport, FleetError> {
        let mut report = SyncReport::default();
        let mut seen = Vec::with_capacity(devices.len());
        for device in devices {
            match self.heartbeat(device)? {
                HeartbeatOutcome::Registered(agent) => {
                    seen.push(agent.agent_id.clone());
                    report.registered.push(agent.agent_id);
                }
                HeartbeatOutcome::Refreshed(agent) => {
                    seen.push(agent.agent_id.clone());
                    report.refreshed.push(agent.agent_id);
                }
                HeartbeatOutcome::PoolExhausted { fingerprint } => {
                    report.exhausted.push(fingerprint);
                }
            }
        }
        report.marked_unresponsive = self.store.mark_unresponsive_except(&self.node_id, &seen)?;
        Ok(report)
    }

    pub fn liveness_of(&self, agent: &AgentRecord) -> Liveness {
        classify_liveness(
            agent.last_heartbeat_at,
            agent.responsive,
            now_millis(),
            &self.thresholds,
        )
    }

    /// Every known agent on every node with its current liveness.
    pub fn list_agents(&self) -> Result<Vec<AgentStatus>, FleetError> {
        Ok(self
            .store
            .list_agents(None)?
            .into_iter()
            .map(|agent| AgentStatus {
                liveness: self.liveness_of(&agent),
                agent,
            })
            .collect())
    }

    /// This node's agents that can take a claim right now.
    pub fn idle_online_agents(&self) -> Result<Vec<AgentRecord>, FleetError> {
        Ok(self
            .store
            .list_agents(Some(&self.node_id))?
            .into_iter()
            .filter(|agent| agent.current_assignment.is_none())
            .filter(|agent| self.liveness_of(agent) == Liveness::Online)
            .collect())
    }

    /// Frees the slot of one of this node's agents so other hardware can take it. The agent
    /// row goes too; if the device is still attached it registers again on its next
    /// heartbeat. Agents holding an active assignment are left alone.
    pub fn release_agent(&self, agent_id: &AgentId) -> Result<ReleaseOutcome, FleetError> {
        let Some(agent) = self.store.get_agent(agent_id)? else {
            return Ok(ReleaseOutcome::Unknown);
        };
        if agent.node_id != self.node_id {
            return Err(FleetError::ForeignAgent {
                agent_id: agent_id.to_string(),
                node_id: agent.node_id.to_string(),
            });
        }
        if agent.current_assignment.is_some() || !self.store.remove_idle_agent(agent_id)? {
            return Ok(ReleaseOutcome::Busy {
                assignment_id: agent.current_assignment,
            });
        }
        let slot = self.slots.release(&agent.fingerprint)?;
        self.log(
            LogLevel::Info,
            "fleet.slot_released",
            "agent removed by operator",
            crate::log_fields! {
                "agent_id" => agent_id.as_str(),
                "slot" => slot,
            },
        );
        Ok(ReleaseOutcome::Released {
            agent_id: agent.agent_id,
            slot,
        })
    }

    fn log(
        &self,
        level: LogLevel,
        event: &str,
        message: &str,
        fields: serde_json::Map<String, serde_json::Value>,
    ) {
        if let Some(path) = &self.log_path {
            append_log_event(path, level, event, message, fields);
        }
    }

    /// Agents on any node whose heartbeat aged past the offline threshold.
    pub fn offline_agents(&self) -> Result<Vec<AgentRecord>, FleetError> {
        Ok(self
            .store
            .list_agents(None)?
            .into_iter()
            .filter(|agent| self.liveness_of(agent) == Liveness::Offline)
            .collect())
    }
}
