//! CANopen 控制器：传输层 + 前后两个驱动器的组合
//!
//! `initialize` 只在两个驱动器都引导成功后返回；失败时把已启动的
//! 事件循环拆掉，保证传输层可以整体重建。`deinitialize` 幂等，
//! 在失败的 `initialize` 之后调用也安全。

use crate::bus::{self, BusHandle, NodeShared};
use crate::driver::RoboteqDriver;
use crate::error::{ResultExt, RoboteqError};
use bison_can::{CanAdapter, CanError};
use bison_canopen::MasterDescription;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// CAN 总线参数（`on_init` 后不可变）
#[derive(Debug, Clone, Copy)]
pub struct CanSettings {
    pub master_can_id: u8,
    pub front_driver_can_id: u8,
    pub rear_driver_can_id: u8,
    /// 单次 SDO 操作的名义超时
    pub sdo_operation_timeout: Duration,
    /// PDO 反馈的新鲜度上限
    pub pdo_feedback_timeout: Duration,
}

impl Default for CanSettings {
    fn default() -> Self {
        Self {
            master_can_id: 3,
            front_driver_can_id: 1,
            rear_driver_can_id: 2,
            sdo_operation_timeout: Duration::from_millis(4),
            pdo_feedback_timeout: Duration::from_millis(15),
        }
    }
}

/// CAN 适配器工厂：在事件循环线程内被调用，可多次（传输层重建）
pub type AdapterFactory =
    Arc<dyn Fn() -> Result<Box<dyn CanAdapter + Send>, CanError> + Send + Sync>;

struct ControllerInner {
    bus: BusHandle,
    front: Arc<RoboteqDriver>,
    rear: Arc<RoboteqDriver>,
}

/// 传输层与两个驱动器门面的属主
pub struct CanopenController {
    factory: AdapterFactory,
    description: MasterDescription,
    settings: CanSettings,
    inner: RwLock<Option<ControllerInner>>,
}

impl CanopenController {
    pub fn new(
        factory: AdapterFactory,
        description: MasterDescription,
        settings: CanSettings,
    ) -> Self {
        Self {
            factory,
            description,
            settings,
            inner: RwLock::new(None),
        }
    }

    pub fn settings(&self) -> &CanSettings {
        &self.settings
    }

    /// 启动事件循环并引导两个从站
    pub fn initialize(&self) -> Result<(), RoboteqError> {
        let mut inner = self.inner.write();
        if inner.is_some() {
            return Ok(());
        }

        info!("Initializing CANopen communication");

        // 节点状态重新构造，CAN 错误标志随之清零
        let front_shared = Arc::new(NodeShared::new(self.settings.front_driver_can_id, "front"));
        let rear_shared = Arc::new(NodeShared::new(self.settings.rear_driver_can_id, "rear"));

        let factory = self.factory.clone();
        let mut bus = bus::start(
            move || factory(),
            self.description.clone(),
            vec![front_shared.clone(), rear_shared.clone()],
        )?;

        let front = Arc::new(RoboteqDriver::new(
            front_shared,
            bus.client(),
            self.settings.sdo_operation_timeout,
            self.vendor_id_of(self.settings.front_driver_can_id),
        ));
        let rear = Arc::new(RoboteqDriver::new(
            rear_shared,
            bus.client(),
            self.settings.sdo_operation_timeout,
            self.vendor_id_of(self.settings.rear_driver_can_id),
        ));

        let boot_result = (|| {
            front
                .boot()
                .context("Exception caught when trying to boot the front driver")?;
            rear.boot()
                .context("Exception caught when trying to boot the rear driver")?;
            front.wait_for_boot().context("Front driver boot failed")?;
            rear.wait_for_boot().context("Rear driver boot failed")?;
            Ok(())
        })();

        match boot_result {
            Ok(()) => {
                *inner = Some(ControllerInner { bus, front, rear });
                info!("CANopen communication initialized");
                Ok(())
            }
            Err(e) => {
                // 引导失败：拆掉事件循环，让传输层保持可整体重建
                drop(front);
                drop(rear);
                bus.shutdown();
                Err(e)
            }
        }
    }

    /// 幂等的反初始化；在失败的 `initialize` 之后调用也安全
    pub fn deinitialize(&self) {
        let mut inner = self.inner.write();
        if let Some(ControllerInner {
            mut bus,
            front,
            rear,
        }) = inner.take()
        {
            info!("Deinitializing CANopen communication");
            // 与构造相反的顺序：先放驱动器，再停事件循环
            drop(rear);
            drop(front);
            bus.shutdown();
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.read().is_some()
    }

    pub fn front_driver(&self) -> Result<Arc<RoboteqDriver>, RoboteqError> {
        self.inner
            .read()
            .as_ref()
            .map(|inner| inner.front.clone())
            .ok_or(RoboteqError::NotInitialized)
    }

    pub fn rear_driver(&self) -> Result<Arc<RoboteqDriver>, RoboteqError> {
        self.inner
            .read()
            .as_ref()
            .map(|inner| inner.rear.clone())
            .ok_or(RoboteqError::NotInitialized)
    }

    fn vendor_id_of(&self, node: u8) -> Option<u32> {
        self.description.node(node).and_then(|n| n.vendor_id)
    }
}
