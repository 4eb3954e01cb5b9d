#[cfg(test)]
mod tests {
    use crate::config::PoolConfig;
    use crate::error::Fault;
    use crate::executor::{Executor, InlineExecutor, ThreadPool};
    use crate::flow::{InputPort, Publisher, Subscriber};
    use crate::node::{Control, Node};
    use crate::port::{ScalarInput, StreamInput, StreamOutput, Subscription};
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    /// Everything a test subscriber observes, in arrival order.
    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Signal<T> {
        Next(T),
        Error(String),
        Complete,
    }

    #[derive(Clone)]
    struct Probe<T> {
        signals: Arc<Mutex<Vec<Signal<T>>>>,
        subscription: Arc<Mutex<Option<Subscription<T>>>>,
        /// Demand requested inside on_subscribe; 0 requests nothing.
        initial_demand: i64,
    }

    impl<T> Probe<T> {
        fn new(initial_demand: i64) -> Self {
            Self {
                signals: Arc::new(Mutex::new(Vec::new())),
                subscription: Arc::new(Mutex::new(None)),
                initial_demand,
            }
        }

        fn signals(&self) -> Vec<Signal<T>>
        where
            T: Clone,
        {
            self.signals.lock().clone()
        }

        fn request_more(&self, n: i64)
        where
            T: Send + 'static,
        {
            if let Some(sub) = self.subscription.lock().as_ref() {
                sub.request(n);
            }
        }

        fn cancel(&self)
        where
            T: Send + 'static,
        {
            if let Some(sub) = self.subscription.lock().as_ref() {
                sub.cancel();
            }
        }
    }

    impl<T: Send + Clone + 'static> Subscriber<T> for Probe<T> {
        fn on_subscribe(&mut self, subscription: &Subscription<T>) {
            *self.subscription.lock() = Some(subscription.clone());
            if self.initial_demand > 0 {
                subscription.request(self.initial_demand);
            }
        }

        fn on_next(&mut self, token: T) {
            self.signals.lock().push(Signal::Next(token));
        }

        fn on_error(&mut self, fault: Fault) {
            self.signals.lock().push(Signal::Error(fault.to_string()));
        }

        fn on_complete(&mut self) {
            self.signals.lock().push(Signal::Complete);
        }
    }

    fn wait_until(cond: impl Fn() -> bool, within: Duration) -> bool {
        let start = Instant::now();
        while start.elapsed() < within {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_micros(200));
        }
        cond()
    }

    // ---- gated firing ----

    #[test]
    fn two_scalars_fire_once_and_publish_sum() {
        let node = Node::new(InlineExecutor::handle());
        let p1: ScalarInput<i64> = node.scalar_input();
        let p2: ScalarInput<i64> = node.scalar_input();
        let out: StreamOutput<i64> = node.stream_output();

        let probe = Probe::new(1);
        out.subscribe(probe.clone());

        let runs = Arc::new(AtomicUsize::new(0));
        {
            let (p1, p2, out, runs) = (p1.clone(), p2.clone(), out.clone(), runs.clone());
            node.set_action(move || -> anyhow::Result<Control> {
                runs.fetch_add(1, Ordering::SeqCst);
                let a = p1.current().unwrap_or(0);
                let b = p2.current().unwrap_or(0);
                out.post(a + b).ok();
                Ok(Control::Complete)
            });
        }

        node.start();
        p1.post(3).expect("post p1");
        assert_eq!(runs.load(Ordering::SeqCst), 0, "still gated by p2");
        p2.post(4).expect("post p2");

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(node.is_completed());
        assert!(node.completion_error().is_none());
        // node completion completed the output; subscriber saw 7 then complete
        assert_eq!(
            probe.signals(),
            vec![Signal::Next(7), Signal::Complete],
            "sum delivered exactly once"
        );
    }

    #[test]
    fn concurrent_unblocks_fire_exactly_once() {
        let pool = ThreadPool::spawn(PoolConfig {
            workers: Some(4),
            thread_name: None,
        })
        .expect("pool");

        for _ in 0..20 {
            let node = Node::new(pool.clone());
            const PORTS: usize = 8;
            let inputs: Vec<ScalarInput<usize>> =
                (0..PORTS).map(|_| node.scalar_input()).collect();

            let runs = Arc::new(AtomicUsize::new(0));
            {
                let runs = runs.clone();
                node.set_action(move || -> anyhow::Result<Control> {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok(Control::Complete)
                });
            }
            node.start();

            let joins: Vec<_> = inputs
                .into_iter()
                .enumerate()
                .map(|(i, port)| {
                    std::thread::spawn(move || {
                        port.post(i).expect("post");
                    })
                })
                .collect();
            for join in joins {
                let _ = join.join();
            }

            assert!(node.wait_completed(Duration::from_secs(2)));
            assert_eq!(runs.load(Ordering::SeqCst), 1, "exactly one execution");
        }
        pool.shutdown();
    }

    #[test]
    fn action_failure_reaches_completion_and_subscribers() {
        let node = Node::new(InlineExecutor::handle());
        let out: StreamOutput<u8> = node.stream_output();
        let probe = Probe::new(10);
        out.subscribe(probe.clone());

        node.set_action(move || -> anyhow::Result<Control> {
            Err(anyhow::anyhow!("deliberate failure"))
        });
        node.start();

        assert!(node.is_completed());
        let err = node.completion_error().expect("terminal fault");
        assert!(err.to_string().contains("deliberate failure"));
        assert_eq!(
            probe.signals(),
            vec![Signal::Error("deliberate failure".into())]
        );
    }

    #[test]
    fn panicking_action_completes_exceptionally() {
        let node = Node::new(InlineExecutor::handle());
        node.set_action(move || -> anyhow::Result<Control> { panic!("kaboom") });
        node.start();

        assert!(node.is_completed());
        let err = node.completion_error().expect("terminal fault");
        assert!(err.to_string().contains("kaboom"));
    }

    // ---- backpressure queue ----

    #[test]
    fn demand_conservation_and_ordering() {
        let out: StreamOutput<u32> = StreamOutput::new();
        let probe = Probe::new(2);
        out.subscribe(probe.clone());

        out.post(1).expect("post");
        out.post(2).expect("post");
        out.post(3).expect("post");
        assert_eq!(
            probe.signals(),
            vec![Signal::Next(1), Signal::Next(2)],
            "delivery stops at the demand boundary"
        );
        assert_eq!(out.pending(), 1);

        probe.request_more(5);
        out.complete();
        assert_eq!(
            probe.signals(),
            vec![
                Signal::Next(1),
                Signal::Next(2),
                Signal::Next(3),
                Signal::Complete
            ],
            "orderly drain then exactly one completion"
        );
    }

    #[test]
    fn tokens_buffer_until_demand_arrives() {
        let out: StreamOutput<&'static str> = StreamOutput::new();
        out.post("early").expect("post");

        let probe = Probe::new(0);
        out.subscribe(probe.clone());
        assert_eq!(probe.signals(), vec![], "no demand, no delivery");

        probe.request_more(1);
        assert_eq!(probe.signals(), vec![Signal::Next("early")]);
    }

    #[test]
    fn cancel_and_complete_are_idempotent() {
        let out: StreamOutput<u32> = StreamOutput::new();
        let keeper = Probe::new(i64::MAX);
        let quitter = Probe::new(1);
        out.subscribe(keeper.clone());
        out.subscribe(quitter.clone());

        quitter.cancel();
        quitter.cancel();

        out.post(5).expect("post");
        out.complete();
        out.complete();
        quitter.cancel();

        assert_eq!(
            keeper.signals(),
            vec![Signal::Next(5), Signal::Complete],
            "survivor got the token and one completion"
        );
        assert_eq!(quitter.signals(), vec![], "no signal after cancel");
    }

    #[test]
    fn non_positive_request_kills_only_that_subscription() {
        let out: StreamOutput<u32> = StreamOutput::new();
        let healthy = Probe::new(4);
        let broken = Probe::new(0);
        out.subscribe(healthy.clone());
        out.subscribe(broken.clone());

        broken.request_more(0);
        out.post(9).expect("post");
        out.complete();

        assert_eq!(healthy.signals(), vec![Signal::Next(9), Signal::Complete]);
        let broken_signals = broken.signals();
        assert_eq!(broken_signals.len(), 1);
        assert!(matches!(&broken_signals[0], Signal::Error(msg) if msg.contains("non-positive")));
    }

    #[test]
    fn late_subscriber_to_completed_queue_gets_terminal_only() {
        let out: StreamOutput<u32> = StreamOutput::new();
        out.complete();

        let probe = Probe::new(3);
        out.subscribe(probe.clone());
        assert_eq!(probe.signals(), vec![Signal::Complete]);
    }

    #[test]
    fn subscriber_panic_does_not_poison_the_queue() {
        struct Grenade;
        impl Subscriber<u32> for Grenade {
            fn on_subscribe(&mut self, subscription: &Subscription<u32>) {
                subscription.request(i64::MAX);
            }
            fn on_next(&mut self, _token: u32) {
                panic!("subscriber exploded");
            }
            fn on_error(&mut self, _fault: Fault) {}
            fn on_complete(&mut self) {}
        }

        let out: StreamOutput<u32> = StreamOutput::new();
        out.subscribe(Grenade);
        let survivor = Probe::new(i64::MAX);
        out.subscribe(survivor.clone());

        out.post(1).expect("post");
        out.post(2).expect("post");
        out.complete();

        // the grenade consumed (at most) the first token and died; the
        // survivor keeps receiving and sees exactly one completion
        let signals = survivor.signals();
        assert_eq!(signals.last(), Some(&Signal::Complete));
        assert!(signals.contains(&Signal::Next(2)));
    }

    // ---- actors and pipelines ----

    #[test]
    fn actor_drains_stream_and_completes_on_close() {
        let node = Node::new(InlineExecutor::handle());
        let input: StreamInput<u32> = node.stream_input();
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let (input, seen) = (input.clone(), seen.clone());
            node.set_action(move || -> anyhow::Result<Control> {
                while let Some(v) = input.take() {
                    seen.lock().push(v);
                }
                if input.is_closed() {
                    return Ok(Control::Complete);
                }
                Ok(Control::Rearm)
            });
        }
        node.start();

        for v in 0..5 {
            input.post(v).expect("post");
        }
        input.complete();

        assert!(node.is_completed());
        assert_eq!(*seen.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn pipeline_connects_producer_to_consumer() {
        let pool = ThreadPool::spawn(PoolConfig {
            workers: Some(2),
            thread_name: Some("pipeline".into()),
        })
        .expect("pool");

        // producer: counts 1..=20 through its output
        let producer = Node::new(pool.clone());
        let out: StreamOutput<u32> = producer.stream_output();
        {
            let out = out.clone();
            let mut next = 1u32;
            producer.set_action(move || -> anyhow::Result<Control> {
                out.post(next).ok();
                next += 1;
                if next > 20 {
                    return Ok(Control::Complete);
                }
                Ok(Control::Rearm)
            });
        }

        // consumer actor fed through the bridge
        let consumer = Node::new(pool.clone());
        let input: StreamInput<u32> = consumer.stream_input();
        let collected = Arc::new(Mutex::new(Vec::new()));
        {
            let (input, collected) = (input.clone(), collected.clone());
            consumer.set_action(move || -> anyhow::Result<Control> {
                while let Some(v) = input.take() {
                    collected.lock().push(v);
                }
                if input.is_closed() {
                    return Ok(Control::Complete);
                }
                Ok(Control::Rearm)
            });
        }

        out.connect(&input);
        consumer.start();
        producer.start();

        assert!(producer.wait_completed(Duration::from_secs(2)));
        assert!(consumer.wait_completed(Duration::from_secs(2)));
        assert_eq!(*collected.lock(), (1..=20).collect::<Vec<_>>());
        pool.shutdown();
    }

    #[test]
    fn gate_throttles_actor_firings() {
        let node = Node::new(InlineExecutor::handle());
        let input: StreamInput<u8> = node.stream_input();
        let gate = node.permit_gate(1);
        let runs = Arc::new(AtomicUsize::new(0));
        {
            let (input, runs) = (input.clone(), runs.clone());
            node.set_action(move || -> anyhow::Result<Control> {
                let _ = input.take();
                runs.fetch_add(1, Ordering::SeqCst);
                if input.is_closed() {
                    return Ok(Control::Complete);
                }
                Ok(Control::Rearm)
            });
        }
        node.start();

        input.post(1).expect("post");
        input.post(2).expect("post");
        assert_eq!(runs.load(Ordering::SeqCst), 1, "one permit, one firing");

        gate.release(1).expect("release");
        assert_eq!(runs.load(Ordering::SeqCst), 2, "permit admits the next firing");
        assert!(!node.is_completed());
    }

    #[test]
    fn error_propagates_through_pipeline() {
        let node = Node::new(InlineExecutor::handle());
        let input: StreamInput<u32> = node.stream_input();
        let out: StreamOutput<u32> = node.stream_output();
        let probe = Probe::new(i64::MAX);
        out.subscribe(probe.clone());
        {
            let input = input.clone();
            node.set_action(move || -> anyhow::Result<Control> {
                if input.is_closed() {
                    if let Some(f) = input.fault() {
                        return Err(anyhow::anyhow!(f.to_string()));
                    }
                    return Ok(Control::Complete);
                }
                let _ = input.take();
                Ok(Control::Rearm)
            });
        }
        node.start();

        input.complete_with(crate::error::fault(anyhow::anyhow!("upstream broke")));

        assert!(node.is_completed());
        assert_eq!(
            probe.signals(),
            vec![Signal::Error("upstream broke".into())],
            "fault reached the downstream subscriber"
        );
    }

    // ---- config plumbing ----

    #[test]
    fn pool_spawns_from_json_config() {
        let cfg: PoolConfig =
            serde_json::from_value(serde_json::json!({"workers": 2})).expect("config");
        let pool = ThreadPool::spawn(cfg).expect("pool");
        assert!(pool.is_alive());

        let ran = Arc::new(AtomicUsize::new(0));
        let probe = ran.clone();
        pool.execute(crate::executor::Task::new(move || {
            probe.fetch_add(1, Ordering::Relaxed);
        }));
        assert!(wait_until(
            || ran.load(Ordering::Relaxed) == 1,
            Duration::from_secs(2)
        ));
        pool.shutdown();
        assert!(!pool.is_alive());
    }
}
