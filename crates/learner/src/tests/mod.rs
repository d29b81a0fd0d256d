mod simulation_test;
