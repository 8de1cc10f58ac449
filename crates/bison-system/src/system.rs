//! 系统生命周期
//!
//! 框架可见的硬件系统实现。持有 GPIO 控制器、电机控制器、急停
//! 管理器、错误滤波器与遥测节点，按框架的
//! init→configure→activate→deactivate→cleanup→shutdown 转换构造与
//! 销毁它们，并承载实时 `read`/`write` 周期。
//!
//! 瞬态的 CAN/SDO/PDO 错误在周期内被捕获并交给滤波器，裁决为错误
//! 时写路径退为全零指令；只有总线级故障（读写契约无法满足）才让
//! 生命周期进入错误态。

use crate::error::SystemError;
use crate::estop::{
    EStopManager, EStopManagerResources, EStopStrategy, V10xEStopStrategy, V12xEStopStrategy,
};
use crate::interface::{CallbackResult, HardwareInfo, HardwareInterface};
use crate::node::{DriverStateMsg, SystemNode};
use crate::settings::{sort_joint_names, HardwareVariant, SystemSettings};
use bison_canopen::MasterDescription;
use bison_gpio::{GpioController, GpioError, GpioEvent, GpioPin};
use bison_roboteq::{
    AdapterFactory, ErrorCategory, MotorsController, RoboteqError, RoboteqErrorFilter,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// GPIO 控制器构造器（测试注入桩；默认按硬件版本构造真实控制器）
pub type GpioBuilder =
    Box<dyn Fn(&SystemSettings) -> Result<Arc<dyn GpioController>, GpioError> + Send + Sync>;

/// 可注入的后端集合；`None` 一律走真实硬件
#[derive(Default)]
struct Backends {
    description: Option<MasterDescription>,
    adapter_factory: Option<AdapterFactory>,
    gpio_builder: Option<GpioBuilder>,
}

/// Bison 底盘硬件系统
pub struct BisonSystem {
    backends: Backends,

    settings: Option<SystemSettings>,
    joints: Option<[String; 4]>,

    /// 规范序 [fl, fr, rl, rr]
    hw_commands_velocities: [f64; 4],
    hw_states_positions: [f64; 4],
    hw_states_velocities: [f64; 4],
    hw_states_efforts: [f64; 4],

    gpio: Option<Arc<dyn GpioController>>,
    motors: Option<Arc<MotorsController>>,
    error_filter: Option<Arc<RoboteqErrorFilter>>,
    estop: Option<Arc<EStopManager>>,
    node: Option<SystemNode>,

    motor_controller_write_mtx: Arc<Mutex<()>>,
    time_since_state_poll: Duration,
}

impl Default for BisonSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl BisonSystem {
    /// 真实硬件后端（SocketCAN + 字符设备 GPIO）
    pub fn new() -> Self {
        Self::with_backends_inner(Backends::default())
    }

    /// 注入后端的构造（测试、台架）
    pub fn with_backends(
        description: MasterDescription,
        adapter_factory: AdapterFactory,
        gpio_builder: GpioBuilder,
    ) -> Self {
        Self::with_backends_inner(Backends {
            description: Some(description),
            adapter_factory: Some(adapter_factory),
            gpio_builder: Some(gpio_builder),
        })
    }

    fn with_backends_inner(backends: Backends) -> Self {
        Self {
            backends,
            settings: None,
            joints: None,
            hw_commands_velocities: [0.0; 4],
            hw_states_positions: [f64::NAN; 4],
            hw_states_velocities: [f64::NAN; 4],
            hw_states_efforts: [f64::NAN; 4],
            gpio: None,
            motors: None,
            error_filter: None,
            estop: None,
            node: None,
            motor_controller_write_mtx: Arc::new(Mutex::new(())),
            time_since_state_poll: Duration::ZERO,
        }
    }

    /// 规范序关节名（`on_init` 之后可用）
    pub fn joint_names(&self) -> Option<&[String; 4]> {
        self.joints.as_ref()
    }

    /// 写入规范序下标 `index` 的速度指令（框架侧在 `write` 前调用）
    pub fn set_velocity_command(&mut self, index: usize, velocity: f64) {
        self.hw_commands_velocities[index] = velocity;
    }

    /// 规范序下标 `index` 的 (位置, 速度, 力矩) 状态
    pub fn joint_state(&self, index: usize) -> (f64, f64, f64) {
        (
            self.hw_states_positions[index],
            self.hw_states_velocities[index],
            self.hw_states_efforts[index],
        )
    }

    /// 遥测节点（外部传输层注册发布回调、转接 clear_errors 服务）
    pub fn node(&self) -> Option<&SystemNode> {
        self.node.as_ref()
    }

    /// 急停管理器（机器人级急停服务的入口）
    pub fn e_stop_manager(&self) -> Option<&Arc<EStopManager>> {
        self.estop.as_ref()
    }

    fn load_description(&self, settings: &SystemSettings) -> Result<MasterDescription, SystemError> {
        if let Some(description) = &self.backends.description {
            return Ok(description.clone());
        }
        MasterDescription::from_path(&settings.master_description_path)
            .map_err(|e| SystemError::Roboteq(RoboteqError::Canopen(e)))
    }

    fn build_adapter_factory(
        &self,
        description: &MasterDescription,
    ) -> Result<AdapterFactory, SystemError> {
        if let Some(factory) = &self.backends.adapter_factory {
            return Ok(factory.clone());
        }

        #[cfg(target_os = "linux")]
        {
            use bison_can::{CanAdapter, SocketCanAdapter};
            let interface = description.bus.interface.clone();
            Ok(Arc::new(move || {
                let adapter = SocketCanAdapter::new(interface.clone())?;
                Ok(Box::new(adapter) as Box<dyn CanAdapter + Send>)
            }))
        }
        #[cfg(not(target_os = "linux"))]
        {
            let _ = description;
            Err(SystemError::InvalidConfig(
                "SocketCAN backend is only available on Linux".to_string(),
            ))
        }
    }

    fn build_gpio(&self, settings: &SystemSettings) -> Result<Arc<dyn GpioController>, SystemError> {
        if let Some(builder) = &self.backends.gpio_builder {
            return Ok(builder(settings)?);
        }

        #[cfg(target_os = "linux")]
        {
            use bison_gpio::{V10xGpioController, V12xGpioController};
            let controller: Arc<dyn GpioController> = match settings.hardware_variant {
                HardwareVariant::V12X => {
                    Arc::new(V12xGpioController::new(&settings.gpio_chip_path)?)
                }
                HardwareVariant::V10X => {
                    Arc::new(V10xGpioController::new(&settings.gpio_chip_path)?)
                }
            };
            Ok(controller)
        }
        #[cfg(not(target_os = "linux"))]
        {
            Err(SystemError::InvalidConfig(
                "GPIO backend is only available on Linux".to_string(),
            ))
        }
    }

    fn configure_inner(&mut self) -> Result<(), SystemError> {
        let settings = self
            .settings
            .clone()
            .ok_or(SystemError::NotConstructed("settings"))?;

        let description = self.load_description(&settings)?;
        let factory = self.build_adapter_factory(&description)?;

        let gpio = self.build_gpio(&settings)?;
        gpio.start()?;

        let motors = Arc::new(MotorsController::new(
            factory,
            description,
            settings.can,
            settings.drivetrain,
        ));

        let mut attempt = 1;
        loop {
            match motors.initialize() {
                Ok(()) => break,
                Err(e) if attempt < settings.max_roboteq_initialization_attempts => {
                    warn!(
                        "Roboteq initialization attempt {}/{} failed: {}",
                        attempt, settings.max_roboteq_initialization_attempts, e
                    );
                    motors.deinitialize();
                    attempt += 1;
                }
                Err(e) => {
                    motors.deinitialize();
                    return Err(SystemError::Roboteq(e));
                }
            }
        }

        let error_filter = Arc::new(RoboteqErrorFilter::with_defaults());

        let resources = Arc::new(EStopManagerResources {
            gpio_controller: gpio.clone(),
            motors_controller: motors.clone(),
            error_filter: error_filter.clone(),
            motor_controller_write_mtx: self.motor_controller_write_mtx.clone(),
        });
        let strategy: Box<dyn EStopStrategy> = match settings.hardware_variant {
            HardwareVariant::V12X => Box::new(V12xEStopStrategy::new(resources)),
            HardwareVariant::V10X => Box::new(V10xEStopStrategy::new(
                resources,
                settings.max_safety_stop_attempts,
            )),
        };
        let estop = Arc::new(EStopManager::new(strategy));

        let filter_for_node = error_filter.clone();
        let node = SystemNode::new(move || filter_for_node.set_clear_errors_flag());

        // 上电即安全：配置完成时机器人处于急停态
        estop.trigger_e_stop()?;

        self.gpio = Some(gpio);
        self.motors = Some(motors);
        self.error_filter = Some(error_filter);
        self.estop = Some(estop);
        self.node = Some(node);
        Ok(())
    }

    fn activate_inner(&mut self) -> Result<(), SystemError> {
        let settings = self
            .settings
            .clone()
            .ok_or(SystemError::NotConstructed("settings"))?;
        let motors = self
            .motors
            .clone()
            .ok_or(SystemError::NotConstructed("motors controller"))?;
        let gpio = self
            .gpio
            .clone()
            .ok_or(SystemError::NotConstructed("GPIO controller"))?;
        let estop = self
            .estop
            .clone()
            .ok_or(SystemError::NotConstructed("E-stop manager"))?;

        self.hw_commands_velocities = [0.0; 4];
        self.hw_states_positions = [0.0; 4];
        self.hw_states_velocities = [0.0; 4];
        self.hw_states_efforts = [0.0; 4];

        let mut attempt = 1;
        loop {
            match motors.activate() {
                Ok(()) => break,
                Err(e) if attempt < settings.max_roboteq_activation_attempts => {
                    warn!(
                        "Roboteq activation attempt {}/{} failed: {}",
                        attempt, settings.max_roboteq_activation_attempts, e
                    );
                    attempt += 1;
                }
                Err(e) => return Err(SystemError::Roboteq(e)),
            }
        }

        // 输入脚边沿事件：急停相关的脚直接驱动一次状态读取，
        // 外部触发立刻被记录并压下看门狗
        gpio.configure_edge_event_callback(Box::new(move |event: GpioEvent| {
            debug!("GPIO edge event: {:?} -> {}", event.pin, event.value);
            if matches!(event.pin, GpioPin::EStopReset | GpioPin::MainSw) {
                if let Err(e) = estop.read_e_stop_state() {
                    warn!("E-stop state read from GPIO event failed: {}", e);
                }
            }
        }));

        self.time_since_state_poll = settings.roboteq_state_period;
        Ok(())
    }

    fn destroy_resources(&mut self) {
        if let Some(mut node) = self.node.take() {
            node.shutdown();
        }
        self.estop = None;
        if let Some(motors) = self.motors.take() {
            motors.deinitialize();
        }
        self.gpio = None;
        self.error_filter = None;
    }

    fn send_zero_commands(&self) {
        let Some(motors) = &self.motors else { return };
        let _guard = self.motor_controller_write_mtx.lock();
        if let Err(e) = motors.write_speed(0.0, 0.0, 0.0, 0.0) {
            warn!("Failed to send zero commands: {}", e);
        }
    }
}

impl HardwareInterface for BisonSystem {
    fn on_init(&mut self, info: &HardwareInfo) -> CallbackResult {
        info!("Initializing {}", info.name);

        let joints = match sort_joint_names(&info.joints) {
            Ok(joints) => joints,
            Err(e) => {
                error!("{}", e);
                return CallbackResult::Error;
            }
        };
        let settings = match SystemSettings::from_parameters(&info.parameters) {
            Ok(settings) => settings,
            Err(e) => {
                error!("{}", e);
                return CallbackResult::Error;
            }
        };

        self.joints = Some(joints);
        self.settings = Some(settings);
        self.hw_commands_velocities = [0.0; 4];
        self.hw_states_positions = [f64::NAN; 4];
        self.hw_states_velocities = [f64::NAN; 4];
        self.hw_states_efforts = [f64::NAN; 4];
        CallbackResult::Success
    }

    fn on_configure(&mut self) -> CallbackResult {
        info!("Configuring");
        match self.configure_inner() {
            Ok(()) => CallbackResult::Success,
            Err(e) => {
                error!("Configuration failed: {}", e);
                self.destroy_resources();
                CallbackResult::Failure
            }
        }
    }

    fn on_activate(&mut self) -> CallbackResult {
        info!("Activating");
        match self.activate_inner() {
            Ok(()) => {
                info!("Activation finished");
                CallbackResult::Success
            }
            Err(e) => {
                error!("Activation failed: {}", e);
                CallbackResult::Failure
            }
        }
    }

    fn on_deactivate(&mut self) -> CallbackResult {
        info!("Deactivating");
        self.send_zero_commands();
        if let Some(gpio) = &self.gpio {
            gpio.configure_edge_event_callback(Box::new(|_| {}));
        }
        CallbackResult::Success
    }

    fn on_cleanup(&mut self) -> CallbackResult {
        info!("Cleaning up");
        self.destroy_resources();
        CallbackResult::Success
    }

    fn on_shutdown(&mut self) -> CallbackResult {
        info!("Shutting down");
        self.send_zero_commands();
        self.destroy_resources();
        CallbackResult::Success
    }

    fn on_error(&mut self) -> CallbackResult {
        error!("Handling error: entering E-stop and tearing down the transport");
        if let Some(estop) = &self.estop {
            if let Err(e) = estop.trigger_e_stop() {
                warn!("E-stop trigger in error handling failed: {}", e);
            }
        }
        self.destroy_resources();
        CallbackResult::Success
    }

    fn read(&mut self, period: Duration) -> CallbackResult {
        let (Some(motors), Some(filter), Some(settings)) =
            (self.motors.clone(), self.error_filter.clone(), self.settings.as_ref())
        else {
            return CallbackResult::Error;
        };
        let state_period = settings.roboteq_state_period;

        match motors.update_system_feedback() {
            Ok(()) => {
                let front = motors.front_data();
                let rear = motors.rear_data();
                filter.update_error(
                    ErrorCategory::ReadPdo,
                    front.data_too_old || rear.data_too_old,
                );

                self.hw_states_positions = [
                    front.left.position,
                    front.right.position,
                    rear.left.position,
                    rear.right.position,
                ];
                self.hw_states_velocities = [
                    front.left.velocity,
                    front.right.velocity,
                    rear.left.velocity,
                    rear.right.velocity,
                ];
                self.hw_states_efforts = [
                    front.left.effort,
                    front.right.effort,
                    rear.left.effort,
                    rear.right.effort,
                ];
            }
            Err(e) => {
                // 总线级故障：读写契约已无法满足
                error!("System feedback update failed: {}", e);
                return CallbackResult::Error;
            }
        }

        self.time_since_state_poll += period;
        if self.time_since_state_poll >= state_period {
            self.time_since_state_poll = Duration::ZERO;
            match motors.update_drivers_state() {
                Ok(()) => filter.update_error(ErrorCategory::ReadSdo, false),
                Err(e) => {
                    warn!("Drivers state update failed: {}", e);
                    filter.update_error(ErrorCategory::ReadSdo, true);
                }
            }
            if let Some(node) = &self.node {
                node.publish_driver_state(DriverStateMsg::build(
                    &motors.front_data(),
                    &motors.rear_data(),
                    &filter,
                ));
            }
        }
        CallbackResult::Success
    }

    fn write(&mut self, _period: Duration) -> CallbackResult {
        let (Some(motors), Some(filter), Some(estop)) =
            (self.motors.clone(), self.error_filter.clone(), self.estop.clone())
        else {
            return CallbackResult::Error;
        };

        let _guard = self.motor_controller_write_mtx.lock();

        // 急停或滤波器裁决为错误时，唯一合法的指令是全零
        let safe_stop = estop.is_triggered() || filter.is_any_error();
        let [fl, fr, rl, rr] = if safe_stop {
            [0.0; 4]
        } else {
            self.hw_commands_velocities
        };

        match motors.write_speed(fl, fr, rl, rr) {
            Ok(()) => filter.update_error(ErrorCategory::WriteSdo, false),
            Err(RoboteqError::CanNetwork { name }) => {
                error!("CAN error on the {} driver during write", name);
                return CallbackResult::Error;
            }
            Err(e) => {
                warn!("Speed write failed: {}", e);
                filter.update_error(ErrorCategory::WriteSdo, true);
            }
        }
        CallbackResult::Success
    }
}
