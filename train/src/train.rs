//! The training worker.

use crate::{
    common::*,
    config::{Config, LoggingConfig, TrainingConfig},
    data::{aligned_data_layer_config, BatchSource, TrainingData},
    logging::LoggingMessage,
    schedule::{Schedule, Task},
    utils::{self, LrScheduler, Optimizer, RateCounter},
    validation::DetectionStats,
};
use dwd::{
    data_layer::{Blob, RoiDataLayer},
    decode::DwsHeads,
    dws::{perform_dws, DwsConfig},
    groundtruth::{GroundTruthBuilder, StampKind, StampLoss, TrainingAssignment},
    loss::{DwdLoss, DwdLossOutput},
    model::{DwdModel, DwdModelInit, DwdModelOutput},
    utils::{draw_rect, energy_to_image, input_to_image, DETECTION_COLOR, GT_COLOR},
};
use ndarray::Axis;

/// Everything the training loop evaluates the network with.
struct Evaluator<'a> {
    model: &'a DwdModel,
    loss_fn: &'a DwdLoss,
    dws_heads: Option<&'a DwsHeads>,
    device: Device,
}

/// Start the training worker on the configured device.
pub fn training_worker(
    config: Arc<Config>,
    data: Arc<TrainingData>,
    checkpoint_dir: Arc<Path>,
    logging_tx: broadcast::Sender<LoggingMessage>,
) -> Result<()> {
    let Config {
        ref training,
        ref logging,
        ref assignments,
        ref dws,
        ..
    } = *config;
    let TrainingConfig {
        device,
        ref optimizer,
        regularization_coefficient,
        ref lr_schedule,
        ref schedule,
        save_checkpoint_steps,
        ref load_checkpoint,
        ref pretrained_weights,
        override_initial_step,
        max_nonempty_attempts,
        seed,
    } = *training;
    info!("use device {:?}", device);

    // data layers
    let num_classes = data.classes.len();
    let input_channels = data.input_channels;
    let builder = Arc::new(GroundTruthBuilder::new(assignments.clone())?);
    let data_layer_config = aligned_data_layer_config(&config);
    let pixel_means = data_layer_config
        .subtract_mean
        .then(|| data_layer_config.channel_means(input_channels));

    let mut train_source = BatchSource::new(
        data.train_roidb.clone(),
        num_classes,
        input_channels,
        builder.clone(),
        data_layer_config.clone(),
        &config.prefetch,
        max_nonempty_attempts,
        seed,
    )?;
    let mut validation_layer = data
        .validation_roidb
        .as_ref()
        .map(|roidb| {
            RoiDataLayer::new(
                roidb.clone(),
                num_classes,
                input_channels,
                builder.clone(),
                data_layer_config.clone(),
                true,
                seed,
            )
        })
        .transpose()?;

    // init model
    info!("initializing model");
    let mut vs = nn::VarStore::new(device);
    let root = vs.root();
    let model = DwdModelInit::from_assignments(
        input_channels,
        num_classes,
        config.model.clone(),
        assignments,
    )
    .build(&root / "model")?;
    let mut training_step_tensor = root.zeros_no_train("training_step", &[]);
    let loss_fn = DwdLoss::new(assignments.clone());
    let dws_heads = match DwsHeads::from_assignments(assignments) {
        Ok(heads) => Some(heads),
        Err(err) => {
            warn!("{:#}, detections are not evaluated", err);
            None
        }
    };
    let evaluator = Evaluator {
        model: &model,
        loss_fn: &loss_fn,
        dws_heads: dws_heads.as_ref(),
        device,
    };

    // load weights
    if let Some(file) = pretrained_weights {
        utils::load_pretrained_weights(&mut vs, file)?;
    }
    let loaded = utils::try_load_checkpoint(&mut vs, &logging.dir, load_checkpoint)?;
    let init_step = match (override_initial_step, loaded) {
        (Some(step), _) => step,
        (None, Some(_)) => f64::from(&training_step_tensor) as usize + 1,
        (None, None) => 0,
    };

    let schedule = Schedule::new(schedule, assignments.len())?;
    if init_step >= schedule.total_steps() {
        info!(
            "initial step {} is past the end of the schedule with {} steps",
            init_step,
            schedule.total_steps()
        );
        return Ok(());
    }

    let mut lr_scheduler = LrScheduler::new(lr_schedule, init_step)?;
    let mut optimizer = Optimizer::new(
        &vs,
        optimizer,
        regularization_coefficient,
        lr_scheduler.lr(),
    )?;
    let mut rate_counter = RateCounter::with_second_interval();
    let mut curr_phase = None;
    let mut last_loss = f64::NAN;

    info!("start training from step {}", init_step);

    for step in init_step..schedule.total_steps() {
        let phase_index = schedule
            .phase_index_at(step)
            .ok_or_else(|| format_err!("step {} is out of the schedule", step))?;
        let task = &schedule.phases()[phase_index].task;
        if curr_phase != Some(phase_index) {
            info!("phase {}: train {} from step {}", phase_index, task.name(), step);
            curr_phase = Some(phase_index);
        }

        let lr = lr_scheduler.next();
        optimizer.set_lr(lr);

        // forward and backward
        let blob = train_source.next_batch()?;
        let tensors = blob.to_tensors()?.to_device(device);
        let output = model.forward_t(&tensors.image, true)?;
        let losses = loss_fn.forward(&output, &tensors.targets)?;
        let loss = task.loss(&losses)?;
        optimizer.backward_step(&loss);

        last_loss = f64::from(&loss);
        ensure!(
            last_loss.is_finite(),
            "the loss becomes {} at step {}",
            last_loss,
            step
        );

        // print message
        rate_counter.add(1.0);
        let batch_rate = rate_counter.rate();
        if step % logging.print_interval == 0 {
            let assign_losses = losses
                .task_losses
                .iter()
                .enumerate()
                .map(|(index, loss)| format!("assign_{}: {:.5}", index, f64::from(loss)))
                .join("\t");
            match batch_rate {
                Some(rate) => info!(
                    "epoch: {}\tstep: {}\tlr: {:.5}\tloss: {:.5}\t{}\t{:.2} batches/s",
                    blob.epoch, step, lr, last_loss, assign_losses, rate
                ),
                None => info!(
                    "epoch: {}\tstep: {}\tlr: {:.5}\tloss: {:.5}\t{}",
                    blob.epoch, step, lr, last_loss, assign_losses
                ),
            }
        }

        // send to logger
        if is_step_at(step, logging.log_interval) {
            let scalars = task_scalars(task, last_loss, lr, &losses);
            send_log(&logging_tx, LoggingMessage::new_scalars("train", step, scalars))?;

            if let Some(heads) = &dws_heads {
                let max_level = energy_max_level(&assignments[heads.energy.assignment]);
                let images = tch::no_grad(|| {
                    overlay_images(&blob, &output, heads, dws, pixel_means.as_deref(), max_level)
                })?;
                send_log(&logging_tx, LoggingMessage::new_images("train", step, images))?;
            }
        }

        // validation
        if let Some(layer) = &mut validation_layer {
            if is_step_at(step, logging.validation.task_interval) {
                let loss = evaluator.task_loss(layer, task, logging)?;
                info!("step: {}\tvalidation loss of {}: {:.5}", step, task.name(), loss);
                send_log(
                    &logging_tx,
                    LoggingMessage::new_scalars(
                        "validation",
                        step,
                        [(format!("{}_loss", task.name()), loss)],
                    ),
                )?;
            }

            if is_step_at(step, logging.validation.final_interval) {
                if let Some(stats) = evaluator.detection_stats(layer, dws, logging)? {
                    info!(
                        "step: {}\tprecision: {:.4}\trecall: {:.4}\t(tp: {}, fp: {}, fn: {})",
                        step,
                        stats.precision(),
                        stats.recall(),
                        stats.true_positives,
                        stats.false_positives,
                        stats.false_negatives
                    );
                    send_log(
                        &logging_tx,
                        LoggingMessage::new_scalars(
                            "validation",
                            step,
                            [("precision", stats.precision()), ("recall", stats.recall())],
                        ),
                    )?;
                }
            }
        }

        // save checkpoint
        training_step_tensor.copy_(&Tensor::from(step as f32));
        if is_step_at(step, save_checkpoint_steps) {
            let path = utils::save_checkpoint(&vs, &checkpoint_dir, step, last_loss)?;
            info!("saved checkpoint '{}'", path.display());
        }
    }

    let final_step = schedule.total_steps() - 1;
    let path = utils::save_checkpoint(&vs, &checkpoint_dir, final_step, last_loss)?;
    info!("training finished, saved checkpoint '{}'", path.display());

    Ok(())
}

impl Evaluator<'_> {
    fn forward(&self, blob: &Blob) -> Result<(DwdModelOutput, DwdLossOutput)> {
        let tensors = blob.to_tensors()?.to_device(self.device);
        let output = self.model.forward_t(&tensors.image, false)?;
        let losses = self.loss_fn.forward(&output, &tensors.targets)?;
        Ok((output, losses))
    }

    /// Mean loss of the task over random validation batches.
    fn task_loss(&self, layer: &mut RoiDataLayer, task: &Task, logging: &LoggingConfig) -> Result<f64> {
        let num_batches = logging.validation.task_batches.max(1);
        let total: f64 = tch::no_grad(|| -> Result<_> {
            (0..num_batches).try_fold(0.0, |total, _| {
                let blob = layer.forward()?;
                let (_, losses) = self.forward(&blob)?;
                Ok(total + f64::from(&task.loss(&losses)?))
            })
        })?;
        Ok(total / num_batches as f64)
    }

    /// Box level matching of watershed detections over random validation batches.
    fn detection_stats(
        &self,
        layer: &mut RoiDataLayer,
        dws: &DwsConfig,
        logging: &LoggingConfig,
    ) -> Result<Option<DetectionStats>> {
        let heads = match self.dws_heads {
            Some(heads) => heads,
            None => return Ok(None),
        };
        let iou_threshold = logging.validation.iou_threshold;

        let stats = tch::no_grad(|| -> Result<_> {
            (0..logging.validation.final_batches).try_fold(
                DetectionStats::default(),
                |mut stats, _| {
                    let blob = layer.forward()?;
                    let (output, _) = self.forward(&blob)?;
                    let detections = heads.decode(&output, dws)?;
                    izip!(&detections, &blob.gt_boxes).for_each(|(detections, gt_boxes)| {
                        stats.accumulate(detections, gt_boxes, iou_threshold);
                    });
                    Ok(stats)
                },
            )
        })?;
        Ok(Some(stats))
    }
}

fn is_step_at(step: usize, interval: Option<NonZeroUsize>) -> bool {
    interval.map_or(false, |interval| step % interval.get() == 0)
}

fn send_log(tx: &broadcast::Sender<LoggingMessage>, msg: LoggingMessage) -> Result<()> {
    tx.send(msg)
        .map_err(|_err| format_err!("cannot send message to logger"))?;
    Ok(())
}

fn task_scalars(
    task: &Task,
    loss: f64,
    lr: f64,
    losses: &DwdLossOutput,
) -> Vec<(String, f64)> {
    let assign_losses = losses
        .layer_losses
        .iter()
        .enumerate()
        .flat_map(|(assign, layers)| {
            layers
                .iter()
                .enumerate()
                .map(move |(layer, loss)| (format!("assign_{}_layer_{}", assign, layer), f64::from(loss)))
        });

    [(format!("{}_loss", task.name()), loss), ("lr".to_owned(), lr)]
        .into_iter()
        .chain(assign_losses)
        .collect()
}

/// The value of the highest energy level the energy head predicts.
fn energy_max_level(assign: &TrainingAssignment) -> f32 {
    match assign.stamp {
        StampKind::Energy {
            num_levels,
            loss: StampLoss::Softmax,
            ..
        } => (num_levels - 1) as f32,
        _ => 1.0,
    }
}

/// Draws the first image of the batch with ground truth in green and
/// watershed detections in red, and renders its energy map.
fn overlay_images(
    blob: &Blob,
    output: &DwdModelOutput,
    heads: &DwsHeads,
    dws: &DwsConfig,
    pixel_means: Option<&[f32]>,
    max_level: f32,
) -> Result<Vec<(String, DynamicImage)>> {
    let maps = heads.decode_maps(output)?;
    let first = maps
        .first()
        .ok_or_else(|| format_err!("the batch is empty"))?;
    let detections = perform_dws(
        first.energy.view(),
        first.classes.view(),
        first.bbox.view(),
        heads.ds_factor,
        dws,
    )?;

    let mut image = input_to_image(blob.data.index_axis(Axis(0), 0), pixel_means)?;
    blob.gt_boxes[0]
        .iter()
        .for_each(|label| draw_rect(&mut image, &label.rect, GT_COLOR, 2));
    detections
        .iter()
        .for_each(|detection| draw_rect(&mut image, &detection.rect, DETECTION_COLOR, 1));
    let energy = energy_to_image(first.energy.view(), max_level);

    Ok(vec![
        ("detections".to_owned(), DynamicImage::ImageRgb8(image)),
        ("energy".to_owned(), DynamicImage::ImageLuma8(energy)),
    ])
}
