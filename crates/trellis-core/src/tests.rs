#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use crate::members::*;
    use crate::*;

    fn window_with_label_and_button(graph: &NodeGraph) -> StableHandle {
        graph
            .build_root(NodeKind::Window, |w| {
                w.set(TITLE, String::from("main"))?;
                w.named_child("label", NodeKind::Label, |_| Ok(()))?;
                w.named_child("button", NodeKind::Button, |_| Ok(()))?;
                Ok(())
            })
            .unwrap()
    }

    #[test]
    fn test_forward_reference_reads_configuring_ancestor() {
        let graph = NodeGraph::new();
        let seen = Arc::new(Mutex::new(None));
        graph
            .build_root(NodeKind::Window, |w| {
                w.set(WIDTH, 100.0_f64)?;
                let seen = seen.clone();
                w.child(NodeKind::Widget, move |c| {
                    let parent = c.parent().expect("window frame");
                    assert_eq!(parent.state()?, NodeState::Configuring);
                    *seen.lock().unwrap() = Some(parent.get::<f64>(WIDTH)?);
                    Ok(())
                })?;
                Ok(())
            })
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), Some(100.0));
    }

    #[test]
    fn test_child_is_attached_before_its_initializer_runs() {
        let graph = NodeGraph::new();
        graph
            .build_root(NodeKind::Window, |w| {
                let window = w.id();
                w.child(NodeKind::Label, move |l| {
                    let me = l.id();
                    let graph = l.graph();
                    assert_eq!(graph.parent(me)?, Some(window));
                    assert_eq!(graph.children(window)?, [me]);
                    assert_eq!(graph.state(me)?, NodeState::Configuring);
                    assert!(matches!(graph.get(me), Err(Error::NotFinalized(_))));
                    Ok(())
                })?;
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_named_siblings_resolve_forward_only() {
        let graph = NodeGraph::new();
        let err = graph
            .build_root(NodeKind::Window, |w| {
                w.named_child("first", NodeKind::Label, |_| Ok(()))?;
                w.named_child("second", NodeKind::Label, |l| {
                    let first = l.sibling("first")?;
                    assert_eq!(first.state()?, NodeState::Finalized);
                    Ok(())
                })?;
                w.named_child("third", NodeKind::Label, |l| {
                    l.sibling("fourth")?;
                    Ok(())
                })?;
                w.named_child("fourth", NodeKind::Label, |_| Ok(()))?;
                Ok(())
            })
            .unwrap_err();

        // the innermost failure aborts "third", which aborts the window
        let BuildError::InitializerFailed { kind, source } = err else {
            panic!("expected an initializer failure");
        };
        assert_eq!(kind, NodeKind::Window);
        let inner = source.downcast_ref::<BuildError>().expect("nested build error");
        let BuildError::InitializerFailed { source, .. } = inner else {
            panic!("expected the label's failure");
        };
        assert!(matches!(
            source.downcast_ref::<Error>(),
            Some(Error::UnboundName(name)) if name == "fourth"
        ));
        assert!(graph.is_empty());
    }

    #[test]
    fn test_duplicate_sibling_names_are_rejected() {
        let graph = NodeGraph::new();
        graph
            .build_root(NodeKind::Window, |w| {
                w.named_child("x", NodeKind::Label, |_| Ok(()))?;
                let again = w.named_child("x", NodeKind::Label, |_| Ok(()));
                assert!(matches!(
                    again,
                    Err(BuildError::Graph(Error::DuplicateMember { .. }))
                ));
                Ok(())
            })
            .unwrap();
        assert_eq!(graph.len(), 2);
    }

    #[test]
    fn test_failed_child_is_unwound_and_parent_survives() {
        let graph = NodeGraph::new();
        let clicks = Arc::new(AtomicUsize::new(0));
        let window = graph
            .build_root(NodeKind::Window, |w| {
                let clicks = clicks.clone();
                let failed = w.child(NodeKind::Button, move |b| {
                    b.connect(CLICKED, move |_: &()| {
                        clicks.fetch_add(1, Ordering::SeqCst);
                    })?;
                    b.child(NodeKind::Label, |_| Ok(()))?;
                    anyhow::bail!("no room for a button")
                });
                assert!(matches!(
                    failed,
                    Err(BuildError::InitializerFailed {
                        kind: NodeKind::Button,
                        ..
                    })
                ));
                w.child(NodeKind::Label, |_| Ok(()))?;
                Ok(())
            })
            .unwrap();

        assert_eq!(graph.len(), 2);
        let children = window.children().unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].kind().unwrap(), NodeKind::Label);
    }

    #[test]
    fn test_abort_disconnects_subscriptions_on_surviving_nodes() {
        let graph = NodeGraph::new();
        let window = graph.build_root(NodeKind::Window, |_| Ok(())).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));

        let result = graph.build_child(&window, NodeKind::Label, {
            let calls = calls.clone();
            let window = window.clone();
            move |l| {
                let nested_calls = calls.clone();
                l.subscribe_to(&window, TITLE, move |_: &String, _: &String| {
                    calls.fetch_add(1, Ordering::SeqCst);
                })?;
                l.child(NodeKind::Widget, {
                    let calls = nested_calls;
                    move |c| {
                        c.connect_to(&window, CLOSED, move |_: &()| {
                            calls.fetch_add(1, Ordering::SeqCst);
                        })?;
                        Ok(())
                    }
                })?;
                anyhow::bail!("late failure")
            }
        });
        assert!(result.is_err());

        window.set(TITLE, String::from("still here")).unwrap();
        window.emit(CLOSED, ()).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(window.cell::<String>(TITLE).unwrap().get().unwrap(), "still here");
        assert_eq!(window.signal::<()>(CLOSED).unwrap().connection_count().unwrap(), 0);
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn test_committed_subscriptions_outlive_the_build() {
        let graph = NodeGraph::new();
        let window = window_with_label_and_button(&graph);
        let button = graph.build_child(&window, NodeKind::Button, {
            let window = window.clone();
            move |b| {
                b.connect_to(&window, CLOSED, |_: &()| {})?;
                Ok(())
            }
        });
        assert!(button.is_ok());
        assert_eq!(window.signal::<()>(CLOSED).unwrap().connection_count().unwrap(), 1);
    }

    #[test]
    fn test_panicking_initializer_becomes_an_error() {
        let graph = NodeGraph::new();
        let err = graph
            .build_root(NodeKind::Widget, |_| panic!("bad widget"))
            .unwrap_err();
        assert!(format!("{err}").contains("initializer panicked: bad widget"));
        assert!(graph.is_empty());

        // the busy flag was released by the unwind
        assert!(graph.build_root(NodeKind::Widget, |_| Ok(())).is_ok());
    }

    #[test]
    fn test_nested_build_root_reports_busy() {
        let graph = NodeGraph::new();
        graph
            .build_root(NodeKind::Window, |w| {
                let nested = w.graph().build_root(NodeKind::Widget, |_| Ok(()));
                assert!(matches!(nested, Err(BuildError::Graph(Error::GraphBusy))));
                Ok(())
            })
            .unwrap();
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn test_build_child_sees_existing_named_children() {
        let graph = NodeGraph::new();
        let window = window_with_label_and_button(&graph);
        let late = graph
            .build_named_child(&window, "status", NodeKind::Label, |l| {
                let label = l.sibling("label")?;
                let text = format!("next to {}", label.name()?.unwrap_or_default());
                l.set(TEXT, text)?;
                Ok(())
            })
            .unwrap();
        assert_eq!(late.get::<String>(TEXT).unwrap(), "next to label");
        assert!(matches!(
            graph.build_named_child(&window, "label", NodeKind::Label, |_| Ok(())),
            Err(BuildError::Graph(Error::DuplicateMember { .. }))
        ));
    }

    #[test]
    fn test_sibling_handles_are_capture_only_during_the_build() {
        let graph = NodeGraph::new();
        let window = window_with_label_and_button(&graph);
        let kept = Arc::new(Mutex::new(None));
        graph
            .build_child(&window, NodeKind::Button, {
                let kept = kept.clone();
                move |b| {
                    let label = b.sibling("label")?;
                    assert!(matches!(
                        label.set(TEXT, String::from("early")),
                        Err(Error::CaptureOnly(_))
                    ));
                    assert!(matches!(label.remove(), Err(Error::CaptureOnly(_))));
                    let text = label.cell::<String>(TEXT)?;
                    assert!(matches!(text.subscribe(|_, _| {}), Err(Error::CaptureOnly(_))));
                    assert_eq!(text.get()?, "");

                    // reached through the sibling, so just as restricted
                    let parent = label.parent()?.expect("window");
                    assert!(matches!(
                        parent.emit(CLOSED, ()),
                        Err(Error::CaptureOnly(_))
                    ));

                    // the builder's own node stays writable
                    b.set(TEXT, String::from("ok"))?;
                    *kept.lock().unwrap() = Some(text);
                    Ok(())
                }
            })
            .unwrap();

        let text = kept.lock().unwrap().take().unwrap();
        text.set(String::from("later")).unwrap();
        assert_eq!(window.children().unwrap()[0].get::<String>(TEXT).unwrap(), "later");
    }

    #[test]
    fn test_handles_go_stale_after_removal() {
        let graph = NodeGraph::new();
        let window = window_with_label_and_button(&graph);
        let button = window.children().unwrap()[1].clone();
        let text = button.cell::<String>(TEXT).unwrap();
        let clicked = button.signal::<()>(CLICKED).unwrap();
        let sub = clicked.connect(|_| {}).unwrap();

        window.remove().unwrap();
        assert!(graph.is_empty());
        assert!(!button.is_alive());
        assert!(matches!(button.kind(), Err(Error::UnknownNode(_))));
        assert!(matches!(text.get(), Err(Error::UnknownNode(_))));
        assert!(matches!(text.set(String::new()), Err(Error::UnknownNode(_))));
        assert!(matches!(clicked.emit(()), Err(Error::UnknownNode(_))));
        clicked.disconnect(&sub);
        assert!(!sub.is_active());
        assert!(matches!(graph.remove(button.id()), Err(Error::UnknownNode(_))));
    }

    #[test]
    fn test_dropping_the_graph_invalidates_handles() {
        let graph = NodeGraph::new();
        let window = window_with_label_and_button(&graph);
        let title = window.cell::<String>(TITLE).unwrap();
        drop(graph);
        assert!(!window.is_alive());
        assert!(matches!(title.get(), Err(Error::UnknownNode(_))));
    }

    #[test]
    fn test_member_lookup_errors() {
        let graph = NodeGraph::new();
        let label = graph.create_node(NodeKind::Label, None).unwrap();
        assert!(matches!(
            graph.cell::<String>(label, TITLE),
            Err(Error::UnknownCell { kind: NodeKind::Label, .. })
        ));
        assert!(matches!(
            graph.signal::<()>(label, CLICKED),
            Err(Error::UnknownSignal { .. })
        ));
        assert!(matches!(
            graph.cell::<i32>(label, TEXT),
            Err(Error::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_extra_members_are_declared_during_construction() {
        let graph = NodeGraph::new();
        let counter = graph
            .build_root(NodeKind::Button, |b| {
                let count = b.declare_cell("count", 0_u32)?;
                b.declare_signal::<u32>("reached")?;
                assert!(b.declare_cell("text", 1_u32).is_err());
                let reached = b.signal::<u32>("reached")?;
                b.connect(CLICKED, move |_: &()| {
                    let _ = count.update(|n| *n += 1);
                    if let Ok(n) = count.get() {
                        let _ = reached.emit(n);
                    }
                })?;
                Ok(())
            })
            .unwrap();

        assert_eq!(
            graph.cell_names(counter.id()).unwrap(),
            ["width", "height", "visible", "text", "count"]
        );
        assert_eq!(graph.signal_names(counter.id()).unwrap(), ["clicked", "reached"]);

        let last = Arc::new(AtomicUsize::new(0));
        counter
            .connect("reached", {
                let last = last.clone();
                move |n: &u32| last.store(*n as usize, Ordering::SeqCst)
            })
            .unwrap();
        counter.emit(CLICKED, ()).unwrap();
        counter.emit(CLICKED, ()).unwrap();
        assert_eq!(counter.get::<u32>("count").unwrap(), 2);
        assert_eq!(last.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_nearest_finds_the_closest_matching_ancestor() {
        let graph = NodeGraph::new();
        graph
            .build_root(NodeKind::Window, |w| {
                let window = w.id();
                w.child(NodeKind::Widget, move |outer| {
                    let outer_id = outer.id();
                    outer.child(NodeKind::Widget, move |inner| {
                        assert_eq!(inner.nearest(NodeKind::Window).map(|h| h.id()), Some(window));
                        assert_eq!(inner.nearest(NodeKind::Widget).map(|h| h.id()), Some(outer_id));
                        assert_eq!(inner.nearest(NodeKind::Button), None);
                        let chain: Vec<_> = inner.ancestors().iter().map(|a| a.id()).collect();
                        assert_eq!(chain, [window, outer_id]);
                        assert_eq!(inner.scope().depth(), 3);
                        Ok(())
                    })?;
                    Ok(())
                })?;
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_configuring_nodes_cannot_be_removed() {
        let graph = NodeGraph::new();
        graph
            .build_root(NodeKind::Window, |w| {
                let me = w.id();
                assert!(matches!(w.graph().remove(me), Err(Error::NotFinalized(_))));
                let label = w.child(NodeKind::Label, |_| Ok(()))?;
                assert!(matches!(label.remove(), Err(Error::NotFinalized(_))));
                Ok(())
            })
            .unwrap();
        assert_eq!(graph.len(), 2);
    }

    #[test]
    fn test_move_child_reorders() {
        let graph = NodeGraph::new();
        let window = window_with_label_and_button(&graph);
        let ids: Vec<_> = window.children().unwrap().iter().map(|c| c.id()).collect();

        graph.move_child(window.id(), ids[1], 0).unwrap();
        assert_eq!(graph.children(window.id()).unwrap(), [ids[1], ids[0]]);
        assert!(matches!(
            graph.move_child(window.id(), ids[0], 2),
            Err(Error::IndexOutOfRange { index: 2, len: 2 })
        ));
        assert!(matches!(
            graph.move_child(ids[0], ids[1], 0),
            Err(Error::NotAChild { .. })
        ));
    }

    #[test]
    fn test_describe_tree() {
        let graph = NodeGraph::new();
        window_with_label_and_button(&graph);
        graph.create_node(NodeKind::Widget, None).unwrap();
        insta::assert_snapshot!(graph.describe(), @r#"
        Window
          Label "label"
          Button "button"
        Widget
        "#);
    }
}
