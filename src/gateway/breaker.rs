//! breaker.rs
//!
//! Реализация паттерна "Автоматический выключатель" (Circuit Breaker) для вызовов
//! внешних сервисов. Один экземпляр разделяется всеми задачами через `Arc`, поэтому
//! всё состояние лежит под одним мьютексом.

use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Состояния "Автоматического выключателя".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// **Closed (Замкнуто)**: нормальный режим, запросы разрешены.
    Closed,
    /// **Open (Разомкнуто)**: после серии сбоев запросы отклоняются без обращения к сервису.
    Open,
    /// **HalfOpen (Полуоткрыто)**: после таймаута разрешается один пробный запрос.
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    /// Счетчик последовательных сбоев.
    failure_count: u32,
    /// Момент перехода в Open (или начала пробного запроса), от него отсчитывается таймаут.
    opened_at: Option<Instant>,
    /// В HalfOpen пропускаем только один запрос.
    probe_in_flight: bool,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: &'static str,
    inner: Mutex<BreakerInner>,
    /// Порог сбоев, после которого выключатель переходит в Open.
    failure_threshold: u32,
    /// Длительность Open, после которой происходит переход в HalfOpen.
    cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new(name: &'static str, failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            name,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
            failure_threshold: failure_threshold.max(1),
            cooldown,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    // A panic while holding the lock leaves plain counters behind, safe to reuse.
    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Проверяет, можно ли выполнить следующий запрос к сервису.
    pub fn can_execute(&self) -> bool {
        let mut inner = self.lock();

        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let cooled_down = inner
                    .opened_at
                    .map_or(true, |opened| opened.elapsed() >= self.cooldown);
                if cooled_down {
                    inner.state = CircuitState::HalfOpen;
                    inner.opened_at = Some(Instant::now());
                    inner.probe_in_flight = true;
                    info!(breaker = self.name, "Circuit breaker transitioning to HalfOpen state");
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                // A probe that never reported back (dropped future) is replaced after a cooldown.
                let probe_stale = inner
                    .opened_at
                    .map_or(true, |started| started.elapsed() >= self.cooldown);
                if inner.probe_in_flight && !probe_stale {
                    false
                } else {
                    inner.opened_at = Some(Instant::now());
                    inner.probe_in_flight = true;
                    true
                }
            }
        }
    }

    /// Регистрирует успешное выполнение запроса.
    pub fn record_success(&self) {
        let mut inner = self.lock();

        if inner.state == CircuitState::HalfOpen {
            info!(breaker = self.name, "Circuit breaker recovered - transitioning to Closed state");
        }
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.opened_at = None;
        inner.probe_in_flight = false;
    }

    /// Регистрирует неудачное выполнение запроса.
    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.failure_count = inner.failure_count.saturating_add(1);

        match inner.state {
            CircuitState::Closed => {
                if inner.failure_count >= self.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                    error!(
                        breaker = self.name,
                        "Circuit breaker OPENED - {} failures reached threshold {}",
                        inner.failure_count,
                        self.failure_threshold
                    );
                }
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                inner.probe_in_flight = false;
                warn!(breaker = self.name, "Circuit breaker test failed - returning to Open state");
            }
            CircuitState::Open => {}
        }
    }

    /// Текущее состояние и число сбоев подряд, для мониторинга.
    pub fn status(&self) -> (CircuitState, u32) {
        let inner = self.lock();
        (inner.state, inner.failure_count)
    }
}
