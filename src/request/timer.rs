use std::{
    future::Future,
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::task::JoinHandle;

const ARMED: u8 = 0;
const FIRED: u8 = 1;
const CANCELLED: u8 = 2;

/// Состояние таймера.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    Armed,
    Fired,
    Cancelled,
}

/// Одноразовый отменяемый таймер.
///
/// Взводится при создании, срабатывает не более одного раза, отменяется не
/// более одного раза. Отмена после срабатывания: безопасный no-op: уже
/// запущенный обработчик не прерывается. Переход `Armed → Fired` и
/// `Armed → Cancelled` делается через CAS, поэтому гонка срабатывания и
/// отмены всегда имеет ровно одного победителя. Drop отменяет таймер.
pub struct CancelableTimer {
    state: Arc<AtomicU8>,
    handle: JoinHandle<()>,
}

impl CancelableTimer {
    /// Взводит таймер: через `delay` будет вызван `on_fire`.
    ///
    /// Требует запущенного runtime tokio.
    pub fn arm<F, Fut>(
        delay: Duration,
        on_fire: F,
    ) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let state = Arc::new(AtomicU8::new(ARMED));
        let task_state = state.clone();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if task_state
                .compare_exchange(ARMED, FIRED, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                on_fire().await;
            }
        });

        Self { state, handle }
    }

    /// Отменяет таймер. Возвращает `true`, если отмена произошла до
    /// срабатывания.
    pub fn cancel(&self) -> bool {
        let won = self
            .state
            .compare_exchange(ARMED, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if won {
            self.handle.abort();
        }
        won
    }

    pub fn state(&self) -> TimerState {
        match self.state.load(Ordering::Acquire) {
            ARMED => TimerState::Armed,
            FIRED => TimerState::Fired,
            _ => TimerState::Cancelled,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.state() == TimerState::Armed
    }
}

impl Drop for CancelableTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for CancelableTimer {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("CancelableTimer")
            .field("state", &self.state())
            .finish()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    fn counting_timer(
        delay: Duration,
        hits: &Arc<AtomicUsize>,
    ) -> CancelableTimer {
        let hits = hits.clone();
        CancelableTimer::arm(delay, move || async move {
            hits.fetch_add(1, Ordering::SeqCst);
        })
    }

    /// Тест проверяет однократное срабатывание.
    #[tokio::test(start_paused = true)]
    async fn test_fires_once() {
        let hits = Arc::new(AtomicUsize::new(0));
        let timer = counting_timer(Duration::from_millis(100), &hits);

        tokio::time::sleep(Duration::from_millis(99)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(timer.is_armed());

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(timer.state(), TimerState::Fired);

        // отмена после срабатывания: no-op
        assert!(!timer.cancel());
        assert_eq!(timer.state(), TimerState::Fired);
    }

    /// Тест проверяет, что отменённый таймер не срабатывает, а повторная
    /// отмена ничего не делает.
    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_fire() {
        let hits = Arc::new(AtomicUsize::new(0));
        let timer = counting_timer(Duration::from_millis(100), &hits);

        assert!(timer.cancel());
        assert!(!timer.cancel());

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(timer.state(), TimerState::Cancelled);
    }

    /// Тест проверяет, что drop отменяет таймер.
    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels() {
        let hits = Arc::new(AtomicUsize::new(0));
        drop(counting_timer(Duration::from_millis(10), &hits));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
