use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::engine::HeadEngine;

/// 周期巡检：等待超时、失联Worker、观察者定时事件
pub struct TaskSweeper {
    engine: Arc<HeadEngine>,
    interval: Duration,
}

impl TaskSweeper {
    pub fn new(engine: Arc<HeadEngine>, interval: Duration) -> Self {
        Self { engine, interval }
    }

    /// 运行直到收到关闭信号
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("启动任务巡检循环，间隔 {:?}", self.interval);

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.engine.sweep().await {
                        Ok(outcome) => {
                            if !outcome.timed_out.is_empty() || !outcome.zombied.is_empty() {
                                info!(
                                    timed_out = outcome.timed_out.len(),
                                    zombied = outcome.zombied.len(),
                                    "巡检完成"
                                );
                            } else {
                                debug!("巡检完成，无状态变化");
                            }
                        }
                        Err(e) => error!("任务巡检失败: {}", e),
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("收到关闭信号，退出任务巡检循环");
                    break;
                }
            }
        }
    }
}
