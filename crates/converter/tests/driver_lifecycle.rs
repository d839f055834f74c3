#![cfg(unix)]

mod common;

use std::time::Duration;

use common::{preset, Fixture};
use converter::{
    ConversionDriver, ConversionLib, ConversionStatus, DriverEvent, DriverHandle, DriverState,
};
use tokio::sync::mpsc::UnboundedReceiver;

/// Collect driver events until it settles, reacting to each as it arrives
async fn watch<F>(mut events: UnboundedReceiver<DriverEvent>, handle: DriverHandle, mut on_event: F) -> Vec<DriverEvent>
where
    F: FnMut(&DriverEvent, &DriverHandle),
{
    let mut seen = Vec::new();
    loop {
        let event = match tokio::time::timeout(Duration::from_secs(15), events.recv()).await {
            Ok(Some(event)) => event,
            Ok(None) => break,
            Err(_) => panic!("driver stalled after {:?}", seen.last()),
        };
        on_event(&event, &handle);
        let settled = matches!(
            event,
            DriverEvent::StateChanged(DriverState::Finished | DriverState::Ready | DriverState::Error)
        );
        seen.push(event);
        if settled {
            break;
        }
    }
    seen
}

fn statuses(queue: &converter::MediaQueue) -> Vec<ConversionStatus> {
    queue.iter().map(|i| i.status).collect()
}

#[tokio::test]
async fn test_converts_whole_queue() {
    let fx = Fixture::new();
    let mut lib = ConversionLib::new(&fx.cfg);
    let mut queue = fx.queue(&["a.mpg", "b.mpg"]);

    let (mut driver, events) = ConversionDriver::new(&mut lib, &mut queue, preset(), fx.cfg.conversion_options());
    let handle = driver.handle();
    let (result, seen) = tokio::join!(driver.run(), watch(events, handle, |_, _| {}));

    assert_eq!(result.unwrap(), DriverState::Finished);
    assert_eq!(driver.state(), DriverState::Finished);
    drop(driver);

    assert_eq!(statuses(&queue), vec![ConversionStatus::Done, ConversionStatus::Done]);
    assert!(fx.output("a").exists());
    assert!(fx.output("b").exists());

    let last_progress = seen
        .iter()
        .filter_map(|e| match e {
            DriverEvent::Progress(p) => Some(p.clone()),
            _ => None,
        })
        .last()
        .unwrap();
    assert_eq!(last_progress.position, 1);
    assert_eq!(last_progress.item_percent, 100.0);
    assert_eq!(last_progress.total_percent, 100.0);
}

#[tokio::test]
async fn test_failed_item_does_not_stop_queue() {
    let fx = Fixture::new();
    let mut lib = ConversionLib::new(&fx.cfg);
    let mut queue = fx.queue(&["a.mpg", "__bad__b.mpg", "c.mpg"]);

    let (mut driver, events) = ConversionDriver::new(&mut lib, &mut queue, preset(), fx.cfg.conversion_options());
    let handle = driver.handle();
    let (result, _) = tokio::join!(driver.run(), watch(events, handle, |_, _| {}));

    assert_eq!(result.unwrap(), DriverState::Finished);
    drop(driver);

    assert_eq!(
        statuses(&queue),
        vec![ConversionStatus::Done, ConversionStatus::Failed, ConversionStatus::Done]
    );
    assert_eq!(queue.get_file(1).unwrap().reason.as_deref(), Some("converter reported: Unknown encoder"));
}

#[tokio::test]
async fn test_cancel_mid_queue() {
    let fx = Fixture::new();
    let mut lib = ConversionLib::new(&fx.cfg);
    let mut queue = fx.queue(&["a.mpg", "__slow__b.mpg", "c.mpg"]);

    let (mut driver, events) = ConversionDriver::new(&mut lib, &mut queue, preset(), fx.cfg.conversion_options());
    let handle = driver.handle();
    let (result, seen) = tokio::join!(
        driver.run(),
        watch(events, handle, |event, handle| {
            // Cancel once the slow item has produced output
            if let DriverEvent::Progress(p) = event {
                if p.position == 1 {
                    handle.cancel();
                }
            }
        })
    );

    assert_eq!(result.unwrap(), DriverState::Ready);
    assert_eq!(driver.state(), DriverState::Ready);
    drop(driver);

    assert_eq!(
        statuses(&queue),
        vec![ConversionStatus::Done, ConversionStatus::Stopped, ConversionStatus::Skipped]
    );
    assert!(fx.output("a").exists());
    assert!(!fx.output("__slow__b").exists());
    assert!(!fx.output("c").exists());
    assert!(seen.contains(&DriverEvent::StateChanged(DriverState::Stopped)));
    assert!(!seen.contains(&DriverEvent::ItemStarted { position: 2 }));
}

#[tokio::test]
async fn test_stop_keeps_partial_output() {
    let fx = Fixture::new();
    let mut lib = ConversionLib::new(&fx.cfg);
    let mut queue = fx.queue(&["__slow__a.mpg", "b.mpg"]);

    let (mut driver, events) = ConversionDriver::new(&mut lib, &mut queue, preset(), fx.cfg.conversion_options());
    let handle = driver.handle();
    let (result, _) = tokio::join!(
        driver.run(),
        watch(events, handle, |event, handle| {
            if matches!(event, DriverEvent::Progress(_)) {
                handle.stop();
            }
        })
    );

    assert_eq!(result.unwrap(), DriverState::Ready);
    drop(driver);

    assert_eq!(statuses(&queue), vec![ConversionStatus::Stopped, ConversionStatus::Skipped]);
    assert!(fx.output("__slow__a").exists());
    assert!(!lib.converter_is_running());
}

#[tokio::test]
async fn test_skip_current_continues() {
    let fx = Fixture::new();
    let mut lib = ConversionLib::new(&fx.cfg);
    let mut queue = fx.queue(&["__slow__a.mpg", "b.mpg"]);

    let (mut driver, events) = ConversionDriver::new(&mut lib, &mut queue, preset(), fx.cfg.conversion_options());
    let handle = driver.handle();
    let (result, _) = tokio::join!(
        driver.run(),
        watch(events, handle, |event, handle| {
            if matches!(event, DriverEvent::ItemStarted { position: 0 }) {
                handle.skip_current();
            }
        })
    );

    assert_eq!(result.unwrap(), DriverState::Finished);
    drop(driver);

    assert_eq!(statuses(&queue), vec![ConversionStatus::Stopped, ConversionStatus::Done]);
    assert_eq!(queue.get_file(0).unwrap().reason.as_deref(), Some("skipped by user"));
}

#[tokio::test]
async fn test_pause_holds_next_item_until_resume() {
    let fx = Fixture::new();
    let mut lib = ConversionLib::new(&fx.cfg);
    let mut queue = fx.queue(&["__slow__a.mpg", "b.mpg"]);

    let (mut driver, events) = ConversionDriver::new(&mut lib, &mut queue, preset(), fx.cfg.conversion_options());
    let handle = driver.handle();
    let (result, seen) = tokio::join!(
        driver.run(),
        watch(events, handle, |event, handle| match event {
            DriverEvent::ItemStarted { position: 0 } => {
                handle.pause();
                handle.skip_current();
            }
            DriverEvent::ItemFinished { position: 0, .. } => handle.resume(),
            _ => {}
        })
    );

    assert_eq!(result.unwrap(), DriverState::Finished);
    drop(driver);

    let paused = seen
        .iter()
        .position(|e| *e == DriverEvent::StateChanged(DriverState::Paused))
        .unwrap();
    let resumed = seen
        .iter()
        .rposition(|e| *e == DriverEvent::StateChanged(DriverState::Converting))
        .unwrap();
    let second = seen
        .iter()
        .position(|e| *e == DriverEvent::ItemStarted { position: 1 })
        .unwrap();
    assert!(paused < resumed && resumed < second);
    assert_eq!(statuses(&queue), vec![ConversionStatus::Stopped, ConversionStatus::Done]);
}

#[tokio::test]
async fn test_rerun_after_reset() {
    let fx = Fixture::new();
    let mut lib = ConversionLib::new(&fx.cfg);
    let mut queue = fx.queue(&["a.mpg"]);

    for _ in 0..2 {
        queue.reset_statuses();
        let (mut driver, events) =
            ConversionDriver::new(&mut lib, &mut queue, preset(), fx.cfg.conversion_options());
        let handle = driver.handle();
        let (result, _) = tokio::join!(driver.run(), watch(events, handle, |_, _| {}));
        assert_eq!(result.unwrap(), DriverState::Finished);
        drop(driver);
        assert_eq!(statuses(&queue), vec![ConversionStatus::Done]);
    }
}
