//! Roboteq 错误滤波器
//!
//! Roboteq 控制器偶尔会漏掉一个 SDO 响应，或者 PDO 晚到一拍。这类
//! 错误通常是孤立的一次性事件，直接升级会让底盘频繁进入错误态；
//! 滤波器按类别对错误去抖，只有在时间窗内累计超过阈值才给出
//! 错误裁决。没有后台定时器，窗口淘汰在每次更新/查询时惰性完成。

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// 被跟踪的错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    ReadSdo,
    WriteSdo,
    ReadPdo,
}

impl ErrorCategory {
    fn index(self) -> usize {
        match self {
            Self::ReadSdo => 0,
            Self::WriteSdo => 1,
            Self::ReadPdo => 2,
        }
    }
}

/// 单类别的滤波参数
#[derive(Debug, Clone, Copy)]
pub struct ErrorFilterSettings {
    /// 触发错误裁决的累计次数
    pub max_errors_count: u32,
    /// 计数的滑动时间窗
    pub max_errors_time_window: Duration,
}

#[derive(Debug)]
struct CategoryFilter {
    settings: ErrorFilterSettings,
    count: u32,
    last_error: Option<Instant>,
}

impl CategoryFilter {
    fn new(settings: ErrorFilterSettings) -> Self {
        Self {
            settings,
            count: 0,
            last_error: None,
        }
    }

    fn evict_if_stale(&mut self, now: Instant) {
        if let Some(last) = self.last_error {
            if now.duration_since(last) > self.settings.max_errors_time_window {
                self.count = 0;
                self.last_error = None;
            }
        }
    }

    fn update(&mut self, occurred: bool, now: Instant) {
        if occurred {
            self.evict_if_stale(now);
            self.count += 1;
            self.last_error = Some(now);
        } else {
            self.evict_if_stale(now);
        }
    }

    fn is_error(&mut self, now: Instant) -> bool {
        self.evict_if_stale(now);
        self.count >= self.settings.max_errors_count
    }

    fn clear(&mut self) {
        self.count = 0;
        self.last_error = None;
    }
}

/// 按类别去抖的错误滤波器
pub struct RoboteqErrorFilter {
    filters: Mutex<[CategoryFilter; 3]>,
    clear_errors: AtomicBool,
}

impl RoboteqErrorFilter {
    pub fn new(
        read_sdo: ErrorFilterSettings,
        write_sdo: ErrorFilterSettings,
        read_pdo: ErrorFilterSettings,
    ) -> Self {
        Self {
            filters: Mutex::new([
                CategoryFilter::new(read_sdo),
                CategoryFilter::new(write_sdo),
                CategoryFilter::new(read_pdo),
            ]),
            clear_errors: AtomicBool::new(false),
        }
    }

    /// 出厂默认：ReadSdo {2, 2 s}、WriteSdo {2, 2 s}、ReadPdo {1, 1 s}
    pub fn with_defaults() -> Self {
        Self::new(
            ErrorFilterSettings {
                max_errors_count: 2,
                max_errors_time_window: Duration::from_secs(2),
            },
            ErrorFilterSettings {
                max_errors_count: 2,
                max_errors_time_window: Duration::from_secs(2),
            },
            ErrorFilterSettings {
                max_errors_count: 1,
                max_errors_time_window: Duration::from_secs(1),
            },
        )
    }

    /// 记录一次观测
    ///
    /// `occurred = false` 且清错标志已置位时，立刻清空所有类别的计数
    /// （操作员发起的清错必须即时生效，不等窗口淘汰）。
    pub fn update_error(&self, category: ErrorCategory, occurred: bool) {
        let mut filters = self.filters.lock();
        if !occurred && self.clear_errors.swap(false, Ordering::AcqRel) {
            for filter in filters.iter_mut() {
                filter.clear();
            }
        }
        filters[category.index()].update(occurred, Instant::now());
    }

    /// 单类别裁决
    pub fn is_error(&self, category: ErrorCategory) -> bool {
        self.filters.lock()[category.index()].is_error(Instant::now())
    }

    /// 聚合裁决：任一类别处于错误态
    pub fn is_any_error(&self) -> bool {
        let now = Instant::now();
        self.filters.lock().iter_mut().any(|f| f.is_error(now))
    }

    /// 置清错标志，下一次无错误的更新会清空计数
    pub fn set_clear_errors_flag(&self) {
        self.clear_errors.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    fn filter(count: u32, window_ms: u64) -> RoboteqErrorFilter {
        let s = ErrorFilterSettings {
            max_errors_count: count,
            max_errors_time_window: Duration::from_millis(window_ms),
        };
        RoboteqErrorFilter::new(s, s, s)
    }

    /// 无记录时裁决为无错误
    #[test]
    fn test_clean_filter_reports_no_error() {
        let filter = filter(2, 100);
        assert!(!filter.is_any_error());
        assert!(!filter.is_error(ErrorCategory::ReadSdo));
    }

    /// 达到阈值触发，类别之间互不影响
    #[test]
    fn test_threshold_trips_single_category() {
        let filter = filter(2, 1000);
        filter.update_error(ErrorCategory::WriteSdo, true);
        assert!(!filter.is_any_error());
        filter.update_error(ErrorCategory::WriteSdo, true);
        assert!(filter.is_error(ErrorCategory::WriteSdo));
        assert!(!filter.is_error(ErrorCategory::ReadSdo));
        assert!(filter.is_any_error());
    }

    /// 窗口过期后计数惰性归零
    #[test]
    fn test_window_eviction() {
        let filter = filter(2, 30);
        filter.update_error(ErrorCategory::ReadPdo, true);
        filter.update_error(ErrorCategory::ReadPdo, true);
        assert!(filter.is_error(ErrorCategory::ReadPdo));

        sleep(Duration::from_millis(50));
        // 窗口外的计数在下一次裁决前被淘汰
        assert!(!filter.is_error(ErrorCategory::ReadPdo));
    }

    /// 窗口内的无错误更新不清零
    #[test]
    fn test_ok_update_within_window_keeps_count() {
        let filter = filter(2, 1000);
        filter.update_error(ErrorCategory::ReadSdo, true);
        filter.update_error(ErrorCategory::ReadSdo, false);
        filter.update_error(ErrorCategory::ReadSdo, true);
        assert!(filter.is_error(ErrorCategory::ReadSdo));
    }

    /// 清错标志在下一次无错误更新时立即生效
    #[test]
    fn test_clear_errors_flag() {
        let filter = filter(2, 10_000);
        filter.update_error(ErrorCategory::WriteSdo, true);
        filter.update_error(ErrorCategory::WriteSdo, true);
        filter.update_error(ErrorCategory::ReadSdo, true);
        filter.update_error(ErrorCategory::ReadSdo, true);
        assert!(filter.is_any_error());

        filter.set_clear_errors_flag();
        // 窗口远未过期，清错标志仍强制归零（所有类别）
        filter.update_error(ErrorCategory::WriteSdo, false);
        assert!(!filter.is_any_error());
    }

    /// 默认参数：单次 PDO 错误即触发
    #[test]
    fn test_default_pdo_threshold() {
        let filter = RoboteqErrorFilter::with_defaults();
        filter.update_error(ErrorCategory::ReadPdo, true);
        assert!(filter.is_error(ErrorCategory::ReadPdo));
    }
}
