use trellis_core::members::{CLICKED, CLOSED, HEIGHT, TEXT, TITLE, WIDTH};
use trellis_core::prelude::*;

fn counter_window(graph: &NodeGraph) -> Result<StableHandle, BuildError> {
    graph.build_root(NodeKind::Window, |w| {
        w.set(TITLE, String::from("Counter"))?;
        w.set(WIDTH, 300.0_f64)?;
        w.set(HEIGHT, 200.0_f64)?;
        let count = w.declare_cell("count", 0_i32)?;

        let label = w.named_child("label", NodeKind::Label, |l| {
            let title: String = l.parent().map(|p| p.get(TITLE)).transpose()?.unwrap_or_default();
            l.set(TEXT, format!("{title}: 0"))?;
            Ok(())
        })?;

        for (caption, step) in [("Increment", 1), ("Decrement", -1)] {
            let count = count.clone();
            w.child(NodeKind::Button, move |b| {
                b.set(TEXT, String::from(caption))?;
                b.connect(CLICKED, move |_: &()| {
                    if let Err(e) = count.update(move |c| *c += step) {
                        log::warn!("{caption} ignored: {e}");
                    }
                })?;
                Ok(())
            })?;
        }

        // keep the label in sync with the counter
        w.subscribe("count", move |_: &i32, new: &i32| {
            if let Err(e) = label.set(TEXT, format!("Counter: {new}")) {
                log::warn!("label not updated: {e}");
            }
        })?;
        w.connect(CLOSED, |_: &()| log::info!("window closed"))?;
        Ok(())
    })
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let graph = NodeGraph::new();
    let window = counter_window(&graph)?;
    println!("{}", graph.describe());

    let children = window.children()?;
    let label = &children[0];
    let (increment, decrement) = (&children[1], &children[2]);

    for _ in 0..3 {
        increment.emit(CLICKED, ())?;
    }
    decrement.emit(CLICKED, ())?;
    println!("{}", label.get::<String>(TEXT)?);

    window.emit(CLOSED, ())?;
    window.remove()?;
    log::info!("{} node(s) left", graph.len());
    Ok(())
}
