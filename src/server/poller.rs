//! Shardset server -- configuration poller.
//!
//! Drives the group forward through the configuration sequence one epoch at
//! a time. Advancing strictly one epoch per step keeps migration sources
//! unambiguous: every transition has a well-defined "from" owner set.

use std::sync::Arc;

use crate::server::{ErrCode, ShardServer};

use tokio::time::{self, Duration};

// ShardServer config poller implementation
impl ShardServer {
    /// Config poller thread function.
    pub(crate) async fn poller_task(self: Arc<Self>) {
        pf_debug!(self.me; "poller thread spawned");
        let tick =
            Duration::from_millis(self.config.config_poll_interval_ms);

        while !self.is_dead() {
            // only the leader proposes configuration changes
            if !self.engine.get_state().1 {
                time::sleep(tick).await;
                continue;
            }

            let latest = match self.ctrl.query(None).await {
                Ok(config) => config,
                Err(e) => {
                    pf_debug!(self.me; "controller query failed: {}", e);
                    time::sleep(tick).await;
                    continue;
                }
            };

            // block new client admissions for the whole advance loop
            {
                let _ck = self.ck_mu.lock().await;
                loop {
                    if self.is_dead() {
                        break;
                    }
                    let current_num = self.mu.lock().await.config.num;
                    if current_num >= latest.num {
                        break;
                    }

                    // fetch the immediately next configuration, never skip
                    let next =
                        match self.ctrl.query(Some(current_num + 1)).await {
                            Ok(config) => config,
                            Err(e) => {
                                pf_debug!(self.me; "controller query failed: {}",
                                                   e);
                                break;
                            }
                        };

                    match self.handle_change_config(next).await {
                        Ok(outcome) if outcome.err == ErrCode::Ok => {
                            pf_info!(self.me; "group {} advanced to config {}",
                                              self.gid, outcome.config_num);
                        }
                        Ok(outcome) => {
                            // lost leadership or lost the slot; end this
                            // tick and let the next one retry
                            pf_debug!(self.me; "config advance failed: {:?}",
                                               outcome.err);
                            break;
                        }
                        Err(e) => {
                            pf_warn!(self.me; "config advance errored: {}", e);
                            break;
                        }
                    }
                }
            }

            time::sleep(tick).await;
        }

        pf_debug!(self.me; "poller thread exitted");
    }
}
