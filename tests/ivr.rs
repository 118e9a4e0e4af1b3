mod sim;

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use yexm::{ChannelEvent, Ivr, format::Message, ivr};

fn attach_with_source<'a>(state: &'a sim::State, source: &str) -> Option<&'a Message> {
    state
        .requests
        .iter()
        .find(|request| request.name == "chan.attach" && request.params.get("source") == Some(source))
}

#[tokio::test]
async fn call_setup_installs_filtered_handlers() {
    let (driver, sim) = sim::bind();
    sim.execute_call("sip/1");

    Ivr::run(driver, |ivr| {
        let sim = sim.clone();

        async move {
            assert_eq!(ivr.call_id(), "sip/1");
            assert_eq!(ivr.call_params().get("id"), Some("sip/1"));

            let state = sim.state();

            let mut installed = state.installed.keys().cloned().collect::<Vec<_>>();
            installed.sort();
            assert_eq!(installed, ["chan.dtmf", "chan.hangup", "chan.notify"]);

            let notify = &state.installed["chan.notify"];
            assert_eq!(notify.priority, 100);
            assert_eq!(
                notify.filter,
                Some(("targetid".to_owned(), Some("sip/1".to_owned())))
            );
            for name in ["chan.dtmf", "chan.hangup"] {
                assert_eq!(
                    state.installed[name].filter,
                    Some(("id".to_owned(), Some("sip/1".to_owned())))
                );
            }

            // the call itself was accepted
            assert_eq!(state.replies[0].name, "call.execute");
            assert_eq!(state.replies[0].processed, Some(true));

            Ok(())
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn dtmf_collects_until_the_stop_symbol() {
    let (driver, sim) = sim::bind();
    sim.execute_call("sip/1");

    Ivr::run(driver, |ivr| {
        let sim = sim.clone();

        async move {
            let (collected, ()) = tokio::join!(ivr.read_dtmf_until("#", None), async {
                sim.send_dtmf("sip/1", "4711#");
            });
            assert_eq!(collected, "4711#");

            Ok(())
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn dtmf_stop_symbol_is_consumed_from_the_buffer() {
    let (driver, sim) = sim::bind();
    sim.execute_call("sip/1");

    Ivr::run(driver, |ivr| {
        let sim = sim.clone();

        async move {
            let (collected, ()) = tokio::join!(ivr.read_dtmf_until("#", None), async {
                sim.send_dtmf("sip/1", "12#34");
            });
            assert_eq!(collected, "12#");

            // the symbols keyed past the stop symbol stay buffered,
            // the stop symbol itself does not
            tokio::time::timeout(Duration::from_secs(5), async {
                while ivr.dtmf_buffer() != "34" {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
            .await
            .expect("leftover symbols never reached the buffer");

            Ok(())
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn dtmf_reads_a_fixed_symbol_count() {
    let (driver, sim) = sim::bind();
    sim.execute_call("sip/1");

    Ivr::run(driver, |ivr| {
        let sim = sim.clone();

        async move {
            let (collected, ()) = tokio::join!(ivr.read_dtmf_symbols(3, None), async {
                sim.send_dtmf("sip/1", "2049");
            });
            assert_eq!(collected, "204");

            Ok(())
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn dtmf_read_returns_the_partial_input_on_timeout() {
    let (driver, sim) = sim::bind();
    sim.execute_call("sip/1");

    Ivr::run(driver, |ivr| {
        let sim = sim.clone();

        async move {
            let (collected, ()) = tokio::join!(ivr.read_dtmf_symbols(5, 0.2), async {
                sim.send_dtmf("sip/1", "12");
            });
            assert_eq!(collected, "12");

            let (collected, ()) = tokio::join!(ivr.read_dtmf_until("#", 0.2), async {
                sim.send_dtmf("sip/1", "47");
            });
            assert_eq!(collected, "47");

            Ok(())
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn playback_with_complete_waits_for_the_eof_notify() {
    let (driver, sim) = sim::bind();
    sim.execute_call("sip/1");

    Ivr::run(driver, |ivr| {
        let sim = sim.clone();

        async move {
            let (played, ()) = tokio::join!(ivr.play_soundfile("foo.slin", false, true), async {
                sim.wait_for(|state| {
                    attach_with_source(state, "wave/play/foo.slin").is_some()
                })
                .await;
                sim.notify_eof("sip/1");
            });
            assert!(played?);

            let state = sim.state();
            let attach = attach_with_source(&state, "wave/play/foo.slin").unwrap();
            assert_eq!(attach.params.get("notify"), Some("sip/1"));
            assert_eq!(attach.params.get("autorepeat"), None);

            Ok(())
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn playback_flags_are_checked() {
    let (driver, sim) = sim::bind();
    sim.execute_call("sip/1");

    Ivr::run(driver, |ivr| {
        let sim = sim.clone();

        async move {
            let error = ivr.play_soundfile("foo.slin", true, true).await.unwrap_err();
            assert!(matches!(error, ivr::Error::Usage(_)));

            // repeating playback asks the engine to loop the file
            assert!(ivr.play_soundfile("loop.slin", true, false).await?);
            let state = sim.state();
            let attach = attach_with_source(&state, "wave/play/loop.slin").unwrap();
            assert_eq!(attach.params.get("autorepeat"), Some("true"));

            Ok(())
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn tones_attach_without_notify() {
    let (driver, sim) = sim::bind();
    sim.execute_call("sip/1");

    Ivr::run(driver, |ivr| {
        let sim = sim.clone();

        async move {
            let reply = ivr.silence().await?;
            assert_eq!(reply.processed, Some(true));

            let state = sim.state();
            let attach = attach_with_source(&state, "tone/silence").unwrap();
            assert_eq!(attach.params.get("notify"), None);

            Ok(())
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn hangup_runs_handlers_in_order_then_cancels() {
    let (driver, sim) = sim::bind();
    sim.execute_call("sip/1");

    let order = Arc::new(Mutex::new(Vec::new()));

    Ivr::run(driver, |ivr| {
        let sim = sim.clone();
        let order = order.clone();

        async move {
            for name in ["first", "second"] {
                let order = order.clone();
                ivr.register_hangup_handler(move || order.lock().unwrap().push(name));
            }

            sim.hangup("sip/1");
            std::future::pending::<()>().await;

            Ok(())
        }
    })
    .await
    .unwrap();

    assert_eq!(*order.lock().unwrap(), ["first", "second"]);
}

#[tokio::test(start_paused = true)]
async fn recording_stops_once_the_time_limit_expires() {
    let (driver, sim) = sim::bind();
    sim.execute_call("sip/1");

    Ivr::run(driver, |ivr| {
        let sim = sim.clone();

        async move {
            let stop = ivr
                .record_audio("rec.slin", 5.0)
                .await?
                .expect("a time limit schedules a stop task");

            assert!(stop.await.expect("the stop task may not crash")?);
            sim.wait_for(|state| {
                state
                    .requests
                    .iter()
                    .any(|request| request.params.get("consumer") == Some("wave/record/-"))
            })
            .await;

            let state = sim.state();
            let recording = state
                .requests
                .iter()
                .find(|request| request.params.get("consumer") == Some("wave/record/rec.slin"))
                .unwrap();
            assert_eq!(recording.params.get("notify"), Some("sip/1"));

            Ok(())
        }
    })
    .await
    .unwrap();
}

#[tokio::test(start_paused = true)]
async fn aborting_the_stop_handle_keeps_recording() {
    let (driver, sim) = sim::bind();
    sim.execute_call("sip/1");

    Ivr::run(driver, |ivr| {
        let sim = sim.clone();

        async move {
            let stop = ivr
                .record_audio("rec.slin", 5.0)
                .await?
                .expect("a time limit schedules a stop task");
            stop.abort();

            tokio::time::sleep(Duration::from_secs(30)).await;
            let stopped = sim.state().requests.iter().any(|request| {
                request.params.get("consumer") == Some("wave/record/-")
            });
            assert!(!stopped);

            Ok(())
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn channel_events_race_dtmf_and_playback() {
    let (driver, sim) = sim::bind();
    sim.execute_call("sip/1");

    Ivr::run(driver, |ivr| {
        let sim = sim.clone();

        async move {
            let (event, ()) = tokio::join!(ivr.wait_channel_event(None), async {
                sim.send_dtmf("sip/1", "5");
            });
            assert_eq!(event, Some(ChannelEvent::Dtmf));

            Ok(())
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn channel_event_wait_can_time_out() {
    let (driver, sim) = sim::bind();
    sim.execute_call("sip/1");

    Ivr::run(driver, |ivr| async move {
        assert_eq!(ivr.wait_channel_event(0.05).await, None);

        Ok(())
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn playback_end_wakes_the_event_wait() {
    let (driver, sim) = sim::bind();
    sim.execute_call("sip/1");

    Ivr::run(driver, |ivr| {
        let sim = sim.clone();

        async move {
            let (event, ()) = tokio::join!(ivr.wait_channel_event(None), async {
                sim.notify_eof("sip/1");
            });
            assert_eq!(event, Some(ChannelEvent::PlaybackEnd));

            Ok(())
        }
    })
    .await
    .unwrap();
}
